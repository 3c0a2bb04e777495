use anyhow::{bail, Result};

use crate::gemini::{ClientError, GeminiClient};
use crate::schema::ScriptLine;

/// One SRT cue: half-open interval on the production clock plus the spoken
/// text.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleBlock {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Builds cues from the script's speakable lines and their measured audio
/// durations. `durations` carries one entry per speakable line, in script
/// order, exactly as the producer measures them.
pub fn subtitle_blocks(lines: &[ScriptLine], durations: &[f64]) -> Result<Vec<SubtitleBlock>> {
    let speakable = lines.iter().filter(|line| line.is_speakable());
    if speakable.clone().count() != durations.len() {
        bail!(
            "got {} durations for {} speakable lines",
            durations.len(),
            lines.iter().filter(|line| line.is_speakable()).count()
        );
    }

    let mut blocks = Vec::with_capacity(durations.len());
    let mut cursor = 0.0f64;
    for (line, &duration) in speakable.zip(durations) {
        if !duration.is_finite() || duration < 0.0 {
            bail!("subtitle duration must be finite and non-negative, got {duration}");
        }
        blocks.push(SubtitleBlock {
            index: blocks.len() + 1,
            start: cursor,
            end: cursor + duration,
            text: line.text.trim().to_owned(),
        });
        cursor += duration;
    }
    Ok(blocks)
}

pub fn generate_srt(blocks: &[SubtitleBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        out.push_str(&block.index.to_string());
        out.push('\n');
        out.push_str(&format_timestamp(block.start));
        out.push_str(" --> ");
        out.push_str(&format_timestamp(block.end));
        out.push('\n');
        out.push_str(&block.text);
        out.push_str("\n\n");
    }
    out
}

/// SRT timestamp, `HH:MM:SS,mmm`. Sub-millisecond remainders are truncated
/// so a cue never starts before its audio.
pub fn format_timestamp(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0) as u64;
    let millis = total_millis % 1000;
    let total_seconds = total_millis / 1000;
    let secs = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = total_seconds / 3600;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Strips the markdown code fences chat models like to wrap SRT output in.
pub fn cleanup_model_output(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Fence may carry a language tag on the first line.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim().to_owned()
}

/// Translates a full SRT document, preserving its numbering and timestamps.
pub async fn translate_srt(
    client: &GeminiClient,
    srt: &str,
    target_language: &str,
) -> Result<String, ClientError> {
    let prompt = format!(
        "Translate the text of the following SRT subtitles into {target_language}. \
         Keep every index number and timestamp line exactly as it is and output \
         only the translated SRT document.\n\n{srt}"
    );
    let raw = client.generate_text(&prompt).await?;
    Ok(cleanup_model_output(&raw))
}
