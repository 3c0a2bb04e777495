use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique path in the system temp directory for short-lived intermediates
/// (decoded audio, pre-mux video). Callers remove the file themselves.
pub(crate) fn scratch_path(stem: &str, ext: &str) -> PathBuf {
    let nonce = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "facereel-{stem}-{}-{nonce}.{ext}",
        std::process::id()
    ))
}

#[cfg(test)]
mod tests {
    use super::scratch_path;

    #[test]
    fn scratch_paths_are_unique() {
        let a = scratch_path("audio", "pcm");
        let b = scratch_path("audio", "pcm");
        assert_ne!(a, b);
    }
}
