use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};

use crate::scratch::scratch_path;

/// All decoded audio is normalized to this rate, matching the rate the
/// speech synthesizer is asked for.
pub const SAMPLE_RATE: u32 = 44_100;

pub const CHANNELS: u16 = 2;

/// Seconds of waveform averaged around a sample point. Wide enough to ride
/// over single-sample noise, short enough to track speech cadence.
const AMPLITUDE_WINDOW_SECONDS: f64 = 0.05;

/// Mean absolute amplitude of raw speech is small; this gain stretches it
/// toward the [0, 1] range before clamping.
const AMPLITUDE_GAIN: f32 = 5.0;

/// Decoded interleaved 16-bit PCM. Immutable once handed to the export
/// pipeline; both the amplitude sampler and the audio feed loop read it
/// concurrently without locking.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioTrack {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            bail!("sample rate must be > 0");
        }
        if channels == 0 {
            bail!("channel count must be > 0");
        }
        if samples.len() % channels as usize != 0 {
            bail!(
                "interleaved sample count {} is not divisible by {} channels",
                samples.len(),
                channels
            );
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Number of per-channel sample frames.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Appends another track's samples; formats must match.
    pub fn extend(&mut self, other: &AudioTrack) -> Result<()> {
        if other.sample_rate != self.sample_rate || other.channels != self.channels {
            bail!(
                "cannot concatenate {} Hz/{}ch audio onto {} Hz/{}ch track",
                other.sample_rate,
                other.channels,
                self.sample_rate,
                self.channels
            );
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }
}

/// Pull-based loudness probe over an immutable [`AudioTrack`].
///
/// `sample` is a pure function of the track: it averages absolute amplitude
/// over a short window centered on the requested time, applies a fixed gain,
/// and clamps to [0, 1]. Times outside the track yield 0.
#[derive(Debug, Clone, Copy)]
pub struct AmplitudeSampler<'a> {
    track: &'a AudioTrack,
}

impl<'a> AmplitudeSampler<'a> {
    pub fn new(track: &'a AudioTrack) -> Self {
        Self { track }
    }

    pub fn sample(&self, time: f64) -> f32 {
        let rate = self.track.sample_rate as f64;
        let frames = self.track.frames();
        if frames == 0 || !time.is_finite() {
            return 0.0;
        }

        let index = (time * rate).round() as i64;
        let half = (AMPLITUDE_WINDOW_SECONDS * rate) as i64 / 2;
        let start = (index - half).max(0);
        let end = (index + half).min(frames as i64 - 1);
        if start >= end {
            return 0.0;
        }

        let channels = self.track.channels as usize;
        let mut sum = 0.0f32;
        for frame in start..=end {
            // Channel 0 only; loudness of one channel is plenty for a mouth.
            let sample = self.track.samples[frame as usize * channels];
            sum += (sample as f32 / i16::MAX as f32).abs();
        }
        let mean = sum / (end - start + 1) as f32;
        (mean * AMPLITUDE_GAIN).clamp(0.0, 1.0)
    }
}

pub fn is_ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Decodes any ffmpeg-readable audio file to interleaved s16le PCM at the
/// pipeline's fixed rate and channel count.
pub fn decode_audio(path: &Path) -> Result<AudioTrack> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(path)
        .args([
            "-f",
            "s16le",
            "-ac",
            &CHANNELS.to_string(),
            "-ar",
            &SAMPLE_RATE.to_string(),
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|error| {
            if error.kind() == std::io::ErrorKind::NotFound {
                anyhow!("ffmpeg executable not found; install ffmpeg and put it on PATH")
            } else {
                anyhow!("failed to spawn ffmpeg decoder: {error}")
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ffmpeg failed to decode '{}': {}",
            path.display(),
            stderr.trim()
        );
    }

    let samples = output
        .stdout
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();
    if samples.is_empty() {
        bail!("'{}' decoded to zero audio samples", path.display());
    }
    AudioTrack::new(samples, SAMPLE_RATE, CHANNELS)
}

/// Decodes in-memory encoded audio (e.g. MP3 bytes from the speech
/// synthesizer) by staging it through a scratch file.
pub fn decode_audio_bytes(bytes: &[u8]) -> Result<AudioTrack> {
    let path = scratch_path("speech", "bin");
    std::fs::write(&path, bytes)
        .with_context(|| format!("failed to stage audio at '{}'", path.display()))?;
    let result = decode_audio(&path);
    let _ = std::fs::remove_file(&path);
    result
}
