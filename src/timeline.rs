use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::schema::Emotion;

/// One spoken line's interval on the production clock. Half-open: a scene
/// covers `[start, end)`.
#[derive(Debug, Clone)]
pub struct Scene {
    pub start: f64,
    pub end: f64,
    pub emotion: Emotion,
    pub background: Option<PathBuf>,
}

impl Scene {
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Ordered, non-overlapping scene intervals built from per-line audio
/// durations. Append-only: each scene starts where the previous one ended,
/// so the intervals cannot overlap by construction. Built once per export
/// run and only read afterwards.
///
/// Callers must exclude empty-text lines before appending; an empty line
/// has no audio and therefore no scene.
#[derive(Debug, Default)]
pub struct SceneTimeline {
    scenes: Vec<Scene>,
    cursor: f64,
}

impl SceneTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a scene covering the next `duration` seconds and advances the
    /// cumulative cursor.
    pub fn append(
        &mut self,
        duration: f64,
        emotion: Emotion,
        background: Option<PathBuf>,
    ) -> Result<()> {
        if !duration.is_finite() || duration < 0.0 {
            bail!("scene duration must be finite and non-negative, got {duration}");
        }
        self.scenes.push(Scene {
            start: self.cursor,
            end: self.cursor + duration,
            emotion,
            background,
        });
        self.cursor += duration;
        Ok(())
    }

    /// Resolves the active scene at `time`. First match wins: intervals are
    /// non-overlapping when built through `append`, but if a caller ever
    /// hands us malformed scenes the earliest one still takes precedence.
    ///
    /// Time outside every scene (including past the end of the last one)
    /// resolves to the neutral default with no background. Scene coverage
    /// equals audio duration by construction, so an out-of-range lookup is
    /// a timing mismatch upstream, not a render error.
    pub fn lookup(&self, time: f64) -> (Emotion, Option<&Path>) {
        for scene in &self.scenes {
            if scene.contains(time) {
                return (scene.emotion, scene.background.as_deref());
            }
        }
        (Emotion::Neutral, None)
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// Total covered time, i.e. the sum of all appended durations.
    pub fn duration(&self) -> f64 {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}
