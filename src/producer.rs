use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use crate::audio::{decode_audio_bytes, AudioTrack};
use crate::avatar::FrameSynthesizer;
use crate::gemini::GeminiClient;
use crate::mux::{run_export, ExportReport, FfmpegWriter, MuxConfig};
use crate::schema::{Background, Script};
use crate::subtitles::{generate_srt, subtitle_blocks, translate_srt};
use crate::timeline::SceneTimeline;

#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub out_path: PathBuf,
    pub srt_path: Option<PathBuf>,
    /// Target language for a translated subtitle track, e.g. "English".
    pub translate_to: Option<String>,
}

#[derive(Debug)]
pub struct ProduceReport {
    pub export: ExportReport,
    pub srt_path: Option<PathBuf>,
}

/// Runs the whole production: synthesize speech per line, generate or load
/// backgrounds, build the timeline, export the MP4, and optionally write
/// subtitles alongside.
///
/// Speech synthesis and image generation failures abort the run; there is
/// no video to make without them. A subtitle translation failure only costs
/// the translation.
pub async fn produce(
    script: &Script,
    client: &GeminiClient,
    options: &ProduceOptions,
) -> Result<ProduceReport> {
    script.validate()?;
    let (width, height) = script.resolution.size();
    let mut synthesizer = FrameSynthesizer::new(width, height)?;
    let mut timeline = SceneTimeline::new();
    let mut master: Option<AudioTrack> = None;
    let mut durations = Vec::new();

    let speakable_total = script.speakable_lines().count();
    for (spoken_index, (line_index, line)) in script.speakable_lines().enumerate() {
        eprintln!(
            "[{}/{}] synthesizing line {}: {}",
            spoken_index + 1,
            speakable_total,
            line_index + 1,
            preview_of(&line.text)
        );
        let mp3 = client
            .synthesize_speech(&script.voice, &line.text)
            .await
            .with_context(|| format!("speech synthesis failed for line {}", line_index + 1))?;
        let track = decode_audio_bytes(&mp3)
            .with_context(|| format!("could not decode speech for line {}", line_index + 1))?;
        let duration = track.duration();

        let background = match &line.background {
            Some(Background::Image { path }) => {
                synthesizer.preload_background(path)?;
                Some(path.clone())
            }
            Some(Background::Prompt { prompt }) => {
                eprintln!("  generating background: {}", preview_of(prompt));
                let path = client
                    .generate_image_file(prompt)
                    .await
                    .with_context(|| format!("image generation failed for line {}", line_index + 1))?;
                synthesizer.preload_background(&path)?;
                Some(path)
            }
            None => None,
        };

        timeline.append(duration, line.emotion, background)?;
        durations.push(duration);
        match master.as_mut() {
            Some(track_so_far) => track_so_far.extend(&track)?,
            None => master = Some(track),
        }
    }

    let master = master.ok_or_else(|| anyhow!("script produced no audio"))?;
    eprintln!(
        "exporting {:.2}s of audio to {}",
        master.duration(),
        options.out_path.display()
    );

    let config = MuxConfig {
        width,
        height,
        fps: script.fps,
        out_path: options.out_path.clone(),
    };
    let writer = FfmpegWriter::open(&config, master.format())?;
    let export = run_export(&master, &timeline, &synthesizer, Box::new(writer), script.fps)?;
    if export.frames_dropped > 0 {
        eprintln!("warning: {} frame(s) dropped during export", export.frames_dropped);
    }

    let srt_path = match &options.srt_path {
        Some(path) => {
            let blocks = subtitle_blocks(&script.lines, &durations)?;
            let mut srt = generate_srt(&blocks);
            if let Some(language) = &options.translate_to {
                match translate_srt(client, &srt, language).await {
                    Ok(translated) => srt = translated,
                    // The video is already on disk; keep the original text.
                    Err(error) => {
                        eprintln!("warning: subtitle translation failed, keeping original: {error}")
                    }
                }
            }
            std::fs::write(path, srt)
                .with_context(|| format!("failed to write subtitles '{}'", path.display()))?;
            Some(path.clone())
        }
        None => None,
    };

    Ok(ProduceReport { export, srt_path })
}

fn preview_of(text: &str) -> String {
    let trimmed = text.trim();
    let mut preview = trimmed.chars().take(40).collect::<String>();
    if trimmed.chars().count() > 40 {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_lines() {
        assert_eq!(preview_of("  short  "), "short");
        let long = "x".repeat(60);
        let preview = preview_of(&long);
        assert_eq!(preview.chars().count(), 43);
        assert!(preview.ends_with("..."));
    }
}
