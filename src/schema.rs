use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Default speech voice, matching the Cloud TTS Neural2 Japanese female voice.
pub const DEFAULT_VOICE: &str = "ja-JP-Neural2-B";

pub const DEFAULT_FPS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Angry,
    Sad,
}

impl Emotion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Angry => "angry",
            Self::Sad => "sad",
        }
    }
}

/// Output frame geometry presets. Both are even-sided, as required for
/// yuv420p H.264 output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPreset {
    #[default]
    Square,
    Landscape,
}

impl ResolutionPreset {
    pub fn size(self) -> (u32, u32) {
        match self {
            Self::Square => (1080, 1080),
            Self::Landscape => (1920, 1080),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Background {
    Image { path: PathBuf },
    Prompt { prompt: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptLine {
    pub text: String,
    #[serde(default)]
    pub emotion: Emotion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
}

impl ScriptLine {
    pub fn is_speakable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub resolution: ResolutionPreset,
    #[serde(default = "default_fps")]
    pub fps: u32,
    pub lines: Vec<ScriptLine>,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_owned()
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}

impl Script {
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            bail!("fps must be > 0");
        }
        if self.voice.trim().is_empty() {
            bail!("voice cannot be empty");
        }
        if self.lines.is_empty() {
            bail!("script has no lines");
        }
        if !self.lines.iter().any(ScriptLine::is_speakable) {
            bail!("script has no speakable lines; every line is empty");
        }
        for (index, line) in self.lines.iter().enumerate() {
            if let Some(Background::Prompt { prompt }) = &line.background {
                if prompt.trim().is_empty() {
                    bail!("line {} has an empty background prompt", index + 1);
                }
            }
        }
        Ok(())
    }

    pub fn speakable_lines(&self) -> impl Iterator<Item = (usize, &ScriptLine)> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.is_speakable())
    }
}

pub fn load_script(path: &Path) -> Result<Script> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script '{}'", path.display()))?;
    let script: Script = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse script '{}'", path.display()))?;
    script.validate()?;
    Ok(script)
}
