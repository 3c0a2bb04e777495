pub mod audio;
pub mod avatar;
pub mod cache;
pub mod gemini;
pub mod live;
pub mod mux;
pub mod producer;
pub mod project;
pub mod schema;
pub mod subtitles;
pub mod timeline;

mod scratch;
