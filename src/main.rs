use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use facereel::audio::{decode_audio, AmplitudeSampler};
use facereel::avatar::FrameSynthesizer;
use facereel::cache::Cache;
use facereel::gemini::GeminiClient;
use facereel::live::{amplitude_channel, MouthState};
use facereel::mux::{run_export, FfmpegWriter, MuxConfig};
use facereel::producer::{produce, ProduceOptions};
use facereel::project::load_project;
use facereel::schema::{load_script, Background, Script};
use facereel::subtitles::{generate_srt, subtitle_blocks};
use facereel::timeline::SceneTimeline;

fn long_version() -> String {
    format!(
        "{} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("FACEREEL_GIT_HASH").unwrap_or("unknown")
    )
}

#[derive(Parser)]
#[command(name = "facereel", version, long_version = long_version(), about = "Audio-driven talking avatar video producer")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Produce a video end to end: synthesize speech, generate backgrounds,
    /// render, and mux.
    Produce {
        /// Script file (.yaml script or .json project).
        script: PathBuf,
        /// Output MP4 path.
        #[arg(short, long, default_value = "out.mp4")]
        output: PathBuf,
        /// Also write an SRT subtitle file here.
        #[arg(long)]
        srt: Option<PathBuf>,
        /// Translate the subtitles into this language, e.g. "English".
        #[arg(long, requires = "srt")]
        translate_srt: Option<String>,
        /// Google API key; falls back to $GEMINI_API_KEY.
        #[arg(long)]
        api_key: Option<String>,
        /// Directory for cached speech and images.
        #[arg(long, default_value = ".facereel-cache")]
        cache_dir: PathBuf,
    },
    /// Render a video from a script and an existing audio file, no network.
    Render {
        /// Script file (.yaml script or .json project).
        script: PathBuf,
        /// Audio file to drive the avatar (any format ffmpeg can decode).
        #[arg(long)]
        audio: PathBuf,
        /// Output MP4 path.
        #[arg(short, long, default_value = "out.mp4")]
        output: PathBuf,
        /// Comma-separated per-line durations in seconds, one per speakable
        /// line. Optional when the script has a single speakable line.
        #[arg(long)]
        durations: Option<String>,
    },
    /// Write an SRT subtitle file from a script and per-line durations.
    Subtitles {
        /// Script file (.yaml script or .json project).
        script: PathBuf,
        /// Comma-separated per-line durations in seconds.
        #[arg(long)]
        durations: String,
        /// Output SRT path.
        #[arg(short, long, default_value = "out.srt")]
        output: PathBuf,
    },
    /// Print a mouth-state strip for an audio file, one character per frame
    /// (`_` closed, `o` open, `O` wide).
    Preview {
        /// Audio file (any format ffmpeg can decode).
        audio: PathBuf,
        /// Sampling rate of the strip, in frames per second.
        #[arg(long, default_value_t = 30)]
        fps: u32,
    },
    /// Validate a script file and report its shape.
    Check {
        /// Script file (.yaml script or .json project).
        script: PathBuf,
    },
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    match Cli::parse().command {
        CliCommand::Produce {
            script,
            output,
            srt,
            translate_srt,
            api_key,
            cache_dir,
        } => cmd_produce(&script, output, srt, translate_srt, api_key, &cache_dir),
        CliCommand::Render {
            script,
            audio,
            output,
            durations,
        } => cmd_render(&script, &audio, output, durations.as_deref()),
        CliCommand::Subtitles {
            script,
            durations,
            output,
        } => cmd_subtitles(&script, &durations, &output),
        CliCommand::Preview { audio, fps } => cmd_preview(&audio, fps),
        CliCommand::Check { script } => cmd_check(&script),
    }
}

/// Scripts are YAML; saved projects are JSON. Extension decides.
fn load_any_script(path: &Path) -> Result<Script> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => load_project(path),
        _ => load_script(path),
    }
}

fn cmd_produce(
    script_path: &Path,
    output: PathBuf,
    srt: Option<PathBuf>,
    translate_to: Option<String>,
    api_key: Option<String>,
    cache_dir: &Path,
) -> Result<()> {
    let script = load_any_script(script_path)?;
    let api_key = match api_key.or_else(|| std::env::var("GEMINI_API_KEY").ok()) {
        Some(key) => key,
        None => bail!("no API key; pass --api-key or set GEMINI_API_KEY"),
    };
    let cache = Cache::open(cache_dir)?;
    let client = GeminiClient::new(api_key, cache)?;
    let options = ProduceOptions {
        out_path: output,
        srt_path: srt,
        translate_to,
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let report = runtime.block_on(produce(&script, &client, &options))?;

    eprintln!(
        "wrote {} ({} frames, {:.2}s)",
        report.export.out_path.display(),
        report.export.frames_written,
        report.export.duration_seconds
    );
    if let Some(path) = report.srt_path {
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}

fn cmd_render(
    script_path: &Path,
    audio_path: &Path,
    output: PathBuf,
    durations: Option<&str>,
) -> Result<()> {
    let script = load_any_script(script_path)?;
    let track = decode_audio(audio_path)?;

    let speakable = script.speakable_lines().count();
    let durations = match durations {
        Some(raw) => parse_durations(raw)?,
        None if speakable == 1 => vec![track.duration()],
        None => bail!(
            "--durations is required for scripts with {speakable} speakable lines"
        ),
    };
    if durations.len() != speakable {
        bail!(
            "got {} durations for {} speakable lines",
            durations.len(),
            speakable
        );
    }

    let (width, height) = script.resolution.size();
    let mut synthesizer = FrameSynthesizer::new(width, height)?;
    let mut timeline = SceneTimeline::new();
    for ((index, line), &duration) in script.speakable_lines().zip(&durations) {
        let background = match &line.background {
            Some(Background::Image { path }) => {
                synthesizer.preload_background(path)?;
                Some(path.clone())
            }
            Some(Background::Prompt { .. }) => bail!(
                "line {} uses a generated background; use `produce` for that",
                index + 1
            ),
            None => None,
        };
        timeline.append(duration, line.emotion, background)?;
    }

    let coverage_gap = (timeline.duration() - track.duration()).abs();
    if coverage_gap > 0.25 {
        eprintln!(
            "warning: durations cover {:.2}s but audio runs {:.2}s; tail frames render neutral",
            timeline.duration(),
            track.duration()
        );
    }

    let config = MuxConfig {
        width,
        height,
        fps: script.fps,
        out_path: output,
    };
    let writer = FfmpegWriter::open(&config, track.format())?;
    let report = run_export(&track, &timeline, &synthesizer, Box::new(writer), script.fps)?;
    eprintln!(
        "wrote {} ({} frames, {} dropped)",
        report.out_path.display(),
        report.frames_written,
        report.frames_dropped
    );
    Ok(())
}

fn cmd_subtitles(script_path: &Path, durations: &str, output: &Path) -> Result<()> {
    let script = load_any_script(script_path)?;
    let durations = parse_durations(durations)?;
    let blocks = subtitle_blocks(&script.lines, &durations)?;
    std::fs::write(output, generate_srt(&blocks))
        .with_context(|| format!("failed to write subtitles '{}'", output.display()))?;
    eprintln!("wrote {} ({} cues)", output.display(), blocks.len());
    Ok(())
}

/// Runs the amplitude signal through the preview channel and prints the
/// resulting mouth states as a strip, a quick lip-sync sanity check without
/// rendering anything.
fn cmd_preview(audio_path: &Path, fps: u32) -> Result<()> {
    if fps == 0 {
        bail!("fps must be non-zero");
    }
    let track = decode_audio(audio_path)?;
    let sampler = AmplitudeSampler::new(&track);
    let (feed, mut monitor) = amplitude_channel();

    let total_frames = (track.duration() * fps as f64).floor() as u64;
    let mut strip = String::with_capacity(total_frames as usize);
    for frame_index in 0..total_frames {
        feed.publish(sampler.sample(frame_index as f64 / fps as f64));
        strip.push(match monitor.pump() {
            MouthState::Closed => '_',
            MouthState::Open => 'o',
            MouthState::Wide => 'O',
        });
    }
    feed.finished();
    monitor.pump();

    println!("{strip}");
    eprintln!(
        "{} frames at {} fps over {:.2}s",
        total_frames,
        fps,
        track.duration()
    );
    Ok(())
}

fn cmd_check(script_path: &Path) -> Result<()> {
    let script = load_any_script(script_path)?;
    let (width, height) = script.resolution.size();
    let prompts = script
        .lines
        .iter()
        .filter(|line| matches!(line.background, Some(Background::Prompt { .. })))
        .count();
    println!(
        "ok: {} lines ({} speakable), {}x{} @ {} fps, voice {}, {} generated background(s)",
        script.lines.len(),
        script.speakable_lines().count(),
        width,
        height,
        script.fps,
        script.voice,
        prompts
    );
    Ok(())
}

fn parse_durations(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(|piece| {
            let piece = piece.trim();
            piece
                .parse::<f64>()
                .with_context(|| format!("bad duration '{piece}'"))
        })
        .collect()
}
