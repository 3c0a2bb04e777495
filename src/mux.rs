use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};

use crate::audio::{AmplitudeSampler, AudioFormat, AudioTrack};
use crate::avatar::FrameSynthesizer;
use crate::schema::Emotion;
use crate::scratch::scratch_path;
use crate::timeline::SceneTimeline;

/// Frames of PCM handed to the audio track per append, mirroring the
/// chunked sample buffers an asset reader would produce.
const AUDIO_CHUNK_FRAMES: usize = 4096;

/// Queue depth per track sink. The bounded channel is the readiness signal:
/// a full queue suspends the producer loop until the writer drains it.
const SINK_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct MuxConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub out_path: PathBuf,
}

impl MuxConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("output width/height must be non-zero");
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            // yuv420p subsampling needs even dimensions.
            bail!("output width/height must be even for yuv420p H.264");
        }
        if self.fps == 0 {
            bail!("output fps must be non-zero");
        }
        Ok(())
    }
}

/// Write half of one track. Owned exclusively by the loop that feeds it;
/// the other end is a worker thread draining the bounded queue.
pub struct TrackSink {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    label: &'static str,
}

impl TrackSink {
    fn new(sender: mpsc::SyncSender<Vec<u8>>, label: &'static str) -> Self {
        Self {
            sender: Some(sender),
            label,
        }
    }

    /// Appends one buffer, blocking while the queue is full. Fails once the
    /// sink is finished or its worker has gone away.
    pub fn append(&self, data: Vec<u8>) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("{} sink is already finished", self.label))?;
        sender
            .send(data)
            .map_err(|_| anyhow!("{} sink worker is gone", self.label))
    }

    /// Marks the track finished. Dropping the sender is the EOF signal the
    /// worker waits for.
    pub fn finish(&mut self) {
        self.sender.take();
    }
}

/// Seam between the export pipeline and the concrete muxer so tests can
/// substitute an in-memory container.
pub trait ContainerWriter: Send {
    /// Hands out the video track sink. Callable once per session.
    fn take_video_sink(&mut self) -> Result<TrackSink>;

    /// Hands out the audio track sink. Callable once per session.
    fn take_audio_sink(&mut self) -> Result<TrackSink>;

    /// Waits for both track workers, assembles the container, and returns
    /// the output path. Consumes the writer; a session is never reused.
    fn finalize(self: Box<Self>) -> Result<PathBuf>;

    /// Tears the session down without assembling anything: joins the track
    /// workers and removes intermediates. For the path where a producer
    /// loop already failed and no output should be written.
    fn abort(self: Box<Self>);
}

/// ffmpeg-backed MP4 writer.
///
/// Two workers run for the whole session: one pipes RGBA frames into an
/// ffmpeg process encoding H.264 into a temp video-only MP4, the other
/// streams raw PCM into a temp file. `finalize` joins both and runs a
/// second ffmpeg pass that muxes the pair (`-c:v copy -c:a aac`) into the
/// target, then removes the intermediates.
pub struct FfmpegWriter {
    out_path: PathBuf,
    temp_video: PathBuf,
    temp_audio: PathBuf,
    audio_format: AudioFormat,
    video_sink: Option<TrackSink>,
    audio_sink: Option<TrackSink>,
    video_worker: Option<JoinHandle<Result<()>>>,
    audio_worker: Option<JoinHandle<Result<()>>>,
}

impl FfmpegWriter {
    pub fn open(config: &MuxConfig, audio_format: AudioFormat) -> Result<Self> {
        config.validate()?;
        if audio_format.sample_rate == 0 || audio_format.channels == 0 {
            bail!("audio format must have non-zero rate and channels");
        }
        if let Some(parent) = config.out_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create output directory '{}'", parent.display())
                })?;
            }
        }
        if !crate::audio::is_ffmpeg_available() {
            bail!("ffmpeg is required for MP4 export but was not found on PATH");
        }

        let temp_video = scratch_path("video", "mp4");
        let temp_audio = scratch_path("audio", "pcm");

        let (video_sender, video_receiver) = mpsc::sync_channel::<Vec<u8>>(SINK_QUEUE_DEPTH);
        let (audio_sender, audio_receiver) = mpsc::sync_channel::<Vec<u8>>(SINK_QUEUE_DEPTH);

        let video_args = video_encode_args(config, &temp_video);
        let video_worker = thread::Builder::new()
            .name("facereel-video-encoder".to_owned())
            .spawn(move || run_video_encoder(&video_args, video_receiver))
            .context("failed to spawn video encoder thread")?;

        let audio_path = temp_audio.clone();
        let audio_worker = thread::Builder::new()
            .name("facereel-audio-writer".to_owned())
            .spawn(move || run_audio_writer(&audio_path, audio_receiver))
            .context("failed to spawn audio writer thread")?;

        Ok(Self {
            out_path: config.out_path.clone(),
            temp_video,
            temp_audio,
            audio_format,
            video_sink: Some(TrackSink::new(video_sender, "video")),
            audio_sink: Some(TrackSink::new(audio_sender, "audio")),
            video_worker: Some(video_worker),
            audio_worker: Some(audio_worker),
        })
    }

    /// Drops any remaining senders so the workers see EOF, then joins both.
    fn shutdown(&mut self) -> Result<()> {
        self.video_sink.take();
        self.audio_sink.take();
        let video = join_worker(self.video_worker.take(), "video encoder");
        let audio = join_worker(self.audio_worker.take(), "audio writer");
        video.and(audio)
    }

    fn remove_temps(&self) {
        let _ = std::fs::remove_file(&self.temp_video);
        let _ = std::fs::remove_file(&self.temp_audio);
    }
}

impl ContainerWriter for FfmpegWriter {
    fn take_video_sink(&mut self) -> Result<TrackSink> {
        self.video_sink
            .take()
            .ok_or_else(|| anyhow!("video sink was already taken"))
    }

    fn take_audio_sink(&mut self) -> Result<TrackSink> {
        self.audio_sink
            .take()
            .ok_or_else(|| anyhow!("audio sink was already taken"))
    }

    fn finalize(mut self: Box<Self>) -> Result<PathBuf> {
        let mux_result = self.shutdown().and_then(|_| {
            mux_tracks(
                &self.temp_video,
                &self.temp_audio,
                self.audio_format,
                &self.out_path,
            )
        });
        self.remove_temps();
        mux_result.map(|_| self.out_path.clone())
    }

    fn abort(mut self: Box<Self>) {
        let _ = self.shutdown();
        self.remove_temps();
    }
}

fn join_worker(worker: Option<JoinHandle<Result<()>>>, label: &str) -> Result<()> {
    let handle = worker.ok_or_else(|| anyhow!("{label} thread missing"))?;
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{label} thread panicked")),
    }
}

fn video_encode_args(config: &MuxConfig, temp_video: &Path) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s:v".to_owned(),
        format!("{}x{}", config.width, config.height),
        "-r".to_owned(),
        config.fps.to_string(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
        "-c:v".to_owned(),
        "libx264".to_owned(),
        "-pix_fmt".to_owned(),
        "yuv420p".to_owned(),
    ];
    args.push(temp_video.to_string_lossy().into_owned());
    args
}

fn run_video_encoder(args: &[String], receiver: mpsc::Receiver<Vec<u8>>) -> Result<()> {
    let mut child = Command::new("ffmpeg")
        .args(args.iter().map(String::as_str))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to spawn ffmpeg video encoder")?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
    let mut stderr_pipe = child.stderr.take();

    let mut write_frames = || -> Result<()> {
        while let Ok(frame) = receiver.recv() {
            stdin
                .write_all(&frame)
                .context("failed to write frame to ffmpeg stdin")?;
        }
        stdin.flush().context("failed to flush ffmpeg stdin")
    };
    let write_result = write_frames();
    drop(stdin);

    // A broken pipe usually means the encoder died; reap it either way so
    // no zombie outlives the worker, and surface its stderr.
    if let Err(write_error) = write_result {
        let _ = child.kill();
        let _ = child.wait();
        let tail = read_stderr_tail(&mut stderr_pipe).unwrap_or_default();
        if tail.is_empty() {
            return Err(write_error);
        }
        return Err(write_error.context(format!("encoder reported: {tail}")));
    }

    let status = child.wait().context("failed waiting for ffmpeg encoder")?;
    if !status.success() {
        let tail = read_stderr_tail(&mut stderr_pipe)?;
        bail!("ffmpeg video encode failed with status {status}: {tail}");
    }
    Ok(())
}

fn run_audio_writer(path: &Path, receiver: mpsc::Receiver<Vec<u8>>) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create audio intermediate '{}'", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    while let Ok(chunk) = receiver.recv() {
        writer
            .write_all(&chunk)
            .context("failed to write audio chunk")?;
    }
    writer.flush().context("failed to flush audio intermediate")?;
    Ok(())
}

fn mux_tracks(
    temp_video: &Path,
    temp_audio: &Path,
    audio_format: AudioFormat,
    out_path: &Path,
) -> Result<PathBuf> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(temp_video)
        .args([
            "-f",
            "s16le",
            "-ar",
            &audio_format.sample_rate.to_string(),
            "-ac",
            &audio_format.channels.to_string(),
            "-i",
        ])
        .arg(temp_audio)
        .args([
            "-map",
            "0:v",
            "-map",
            "1:a",
            "-c:v",
            "copy",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-movflags",
            "+faststart",
        ])
        .arg(out_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .context("failed to spawn ffmpeg muxer")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ffmpeg mux into '{}' failed with status {}: {}",
            out_path.display(),
            output.status,
            stderr.trim()
        );
    }
    Ok(out_path.to_path_buf())
}

fn read_stderr_tail(stderr: &mut Option<std::process::ChildStderr>) -> Result<String> {
    let Some(mut pipe) = stderr.take() else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)
        .context("failed reading ffmpeg stderr")?;
    let text = String::from_utf8_lossy(&buf);
    let tail = text.trim();
    Ok(tail.chars().skip(tail.chars().count().saturating_sub(500)).collect())
}

/// Chunked pull over a decoded track, standing in for an asset reader's
/// `copy_next_sample_buffer`. Exhaustion (a `None`) is the audio loop's cue
/// to finish its track.
pub struct AudioReader<'a> {
    track: &'a AudioTrack,
    cursor: usize,
}

impl<'a> AudioReader<'a> {
    pub fn new(track: &'a AudioTrack) -> Self {
        Self { track, cursor: 0 }
    }

    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let samples = self.track.samples();
        if self.cursor >= samples.len() {
            return None;
        }
        let chunk_samples = AUDIO_CHUNK_FRAMES * self.track.channels() as usize;
        let end = (self.cursor + chunk_samples).min(samples.len());
        let bytes = samples[self.cursor..end]
            .iter()
            .flat_map(|sample| sample.to_le_bytes())
            .collect::<Vec<_>>();
        self.cursor = end;
        Some(bytes)
    }
}

/// Rendering seam for the export pipeline. Lets tests drive the loop with
/// a renderer that fails on demand.
pub trait FrameRenderer: Sync {
    /// Size in bytes of one RGBA frame.
    fn frame_len(&self) -> usize;

    fn render(
        &self,
        amplitude: f32,
        emotion: Emotion,
        background: Option<&Path>,
    ) -> Option<Vec<u8>>;
}

impl FrameRenderer for FrameSynthesizer {
    fn frame_len(&self) -> usize {
        self.width() as usize * self.height() as usize * 4
    }

    fn render(
        &self,
        amplitude: f32,
        emotion: Emotion,
        background: Option<&Path>,
    ) -> Option<Vec<u8>> {
        FrameSynthesizer::render(self, amplitude, emotion, background)
    }
}

/// What one export run produced.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub out_path: PathBuf,
    pub total_frames: u64,
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub duration_seconds: f64,
}

/// Runs the full synthesis + mux pipeline against an opened writer.
///
/// Two producer loops run on their own threads: the video loop renders
/// frames in index order and appends them at presentation time
/// `frame_index / fps` (derived from the integer counter, never from
/// accumulated float addition), and the audio loop drains the track reader.
/// Each loop owns its sink outright. The pipeline joins both loops — a
/// rendezvous, not a race — before finalizing the writer.
///
/// A per-frame synthesis failure is counted as dropped, but its index still
/// receives a substitute buffer (the last good frame, or black before any
/// exists) so every later frame keeps presentation time `index / fps` and
/// stays aligned with the audio. Everything else is fatal for the run.
pub fn run_export(
    track: &AudioTrack,
    timeline: &SceneTimeline,
    renderer: &dyn FrameRenderer,
    mut writer: Box<dyn ContainerWriter>,
    fps: u32,
) -> Result<ExportReport> {
    if fps == 0 {
        bail!("fps must be non-zero");
    }
    let duration = track.duration();
    let total_frames = (duration * fps as f64).floor() as u64;
    if total_frames == 0 {
        bail!("audio is shorter than one frame at {fps} fps");
    }

    let mut video_sink = writer.take_video_sink()?;
    let mut audio_sink = writer.take_audio_sink()?;
    let sampler = AmplitudeSampler::new(track);

    let (video_result, audio_result) = thread::scope(|scope| {
        let video = scope.spawn(move || -> Result<(u64, u64)> {
            let mut written = 0u64;
            let mut dropped = 0u64;
            let mut last_frame: Option<Vec<u8>> = None;
            for frame_index in 0..total_frames {
                let time = frame_index as f64 / fps as f64;
                let (emotion, background) = timeline.lookup(time);
                let amplitude = sampler.sample(time);
                match renderer.render(amplitude, emotion, background) {
                    Some(frame) => {
                        last_frame = Some(frame.clone());
                        video_sink.append(frame)?;
                        written += 1;
                    }
                    // The index still gets a buffer; a held frame beats
                    // shifting every later frame off its timestamp.
                    None => {
                        let substitute = last_frame
                            .clone()
                            .unwrap_or_else(|| vec![0u8; renderer.frame_len()]);
                        video_sink.append(substitute)?;
                        dropped += 1;
                    }
                }
            }
            video_sink.finish();
            Ok((written, dropped))
        });

        let audio = scope.spawn(move || -> Result<()> {
            let mut reader = AudioReader::new(track);
            while let Some(chunk) = reader.next_chunk() {
                audio_sink.append(chunk)?;
            }
            audio_sink.finish();
            Ok(())
        });

        let video_result = video
            .join()
            .unwrap_or_else(|_| Err(anyhow!("video loop panicked")));
        let audio_result = audio
            .join()
            .unwrap_or_else(|_| Err(anyhow!("audio loop panicked")));
        (video_result, audio_result)
    });

    let (frames_written, frames_dropped) = match (video_result, audio_result) {
        (Ok(counts), Ok(())) => counts,
        (video_result, audio_result) => {
            // No output should exist for a failed run; abort still joins
            // the workers and removes the intermediates.
            writer.abort();
            video_result?;
            audio_result?;
            unreachable!("both loops succeeded but the success arm did not match")
        }
    };

    let out_path = writer.finalize()?;
    Ok(ExportReport {
        out_path,
        total_frames,
        frames_written,
        frames_dropped,
        duration_seconds: duration,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::audio::{CHANNELS, SAMPLE_RATE};
    use crate::schema::Emotion;

    /// In-memory container: drains both sinks, counts what arrives, and can
    /// be told to reject finalization.
    struct MemoryContainer {
        video_sink: Option<TrackSink>,
        audio_sink: Option<TrackSink>,
        video_worker: Option<JoinHandle<Result<()>>>,
        audio_worker: Option<JoinHandle<Result<()>>>,
        fail_finalize: bool,
        aborted: Arc<AtomicBool>,
        out_path: PathBuf,
    }

    #[derive(Clone, Default)]
    struct Counters {
        video_buffers: Arc<AtomicU64>,
        audio_bytes: Arc<AtomicU64>,
        aborted: Arc<AtomicBool>,
    }

    impl MemoryContainer {
        fn open(fail_finalize: bool) -> (Self, Counters) {
            Self::open_with(fail_finalize, false)
        }

        /// `dead_workers` simulates a writer whose track workers have gone
        /// away, so every append fails.
        fn open_with(fail_finalize: bool, dead_workers: bool) -> (Self, Counters) {
            let counters = Counters::default();
            let (video_sender, video_receiver) = mpsc::sync_channel::<Vec<u8>>(SINK_QUEUE_DEPTH);
            let (audio_sender, audio_receiver) = mpsc::sync_channel::<Vec<u8>>(SINK_QUEUE_DEPTH);

            let video_count = counters.video_buffers.clone();
            let video_worker = thread::spawn(move || {
                if dead_workers {
                    return Ok(());
                }
                while video_receiver.recv().is_ok() {
                    video_count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            });

            let audio_count = counters.audio_bytes.clone();
            let audio_worker = thread::spawn(move || {
                if dead_workers {
                    return Ok(());
                }
                while let Ok(chunk) = audio_receiver.recv() {
                    audio_count.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                }
                Ok(())
            });

            (
                Self {
                    video_sink: Some(TrackSink::new(video_sender, "video")),
                    audio_sink: Some(TrackSink::new(audio_sender, "audio")),
                    video_worker: Some(video_worker),
                    audio_worker: Some(audio_worker),
                    fail_finalize,
                    aborted: counters.aborted.clone(),
                    out_path: PathBuf::from("memory.mp4"),
                },
                counters,
            )
        }
    }

    impl ContainerWriter for MemoryContainer {
        fn take_video_sink(&mut self) -> Result<TrackSink> {
            self.video_sink
                .take()
                .ok_or_else(|| anyhow!("video sink was already taken"))
        }

        fn take_audio_sink(&mut self) -> Result<TrackSink> {
            self.audio_sink
                .take()
                .ok_or_else(|| anyhow!("audio sink was already taken"))
        }

        fn finalize(mut self: Box<Self>) -> Result<PathBuf> {
            self.video_sink.take();
            self.audio_sink.take();
            join_worker(self.video_worker.take(), "memory video")?;
            join_worker(self.audio_worker.take(), "memory audio")?;
            if self.fail_finalize {
                bail!("container rejected finalize");
            }
            Ok(self.out_path.clone())
        }

        fn abort(mut self: Box<Self>) {
            self.video_sink.take();
            self.audio_sink.take();
            let _ = join_worker(self.video_worker.take(), "memory video");
            let _ = join_worker(self.audio_worker.take(), "memory audio");
            self.aborted.store(true, Ordering::Relaxed);
        }
    }

    fn silent_track(frames: usize) -> AudioTrack {
        AudioTrack::new(vec![0i16; frames * CHANNELS as usize], SAMPLE_RATE, CHANNELS).unwrap()
    }

    fn neutral_timeline(duration: f64) -> SceneTimeline {
        let mut timeline = SceneTimeline::new();
        timeline.append(duration, Emotion::Neutral, None).unwrap();
        timeline
    }

    fn small_synth() -> FrameSynthesizer {
        FrameSynthesizer::new(64, 64).unwrap()
    }

    #[test]
    fn config_validation_catches_bad_values() {
        let base = MuxConfig {
            width: 64,
            height: 64,
            fps: 30,
            out_path: PathBuf::from("out.mp4"),
        };
        assert!(base.validate().is_ok());
        assert!(MuxConfig { width: 0, ..base.clone() }.validate().is_err());
        assert!(MuxConfig { width: 63, ..base.clone() }.validate().is_err());
        assert!(MuxConfig { fps: 0, ..base.clone() }.validate().is_err());
    }

    #[test]
    fn two_second_clip_at_30fps_is_exactly_60_frames() {
        // Scenario: one neutral line, 2.0 s of audio.
        let track = silent_track(2 * SAMPLE_RATE as usize);
        let timeline = neutral_timeline(2.0);
        let synth = small_synth();
        let (container, counters) = MemoryContainer::open(false);

        let report =
            run_export(&track, &timeline, &synth, Box::new(container), 30).unwrap();
        assert_eq!(report.total_frames, 60);
        assert_eq!(report.frames_written, 60);
        assert_eq!(report.frames_dropped, 0);
        assert_eq!(counters.video_buffers.load(Ordering::Relaxed), 60);
        assert_eq!(
            counters.audio_bytes.load(Ordering::Relaxed),
            (track.samples().len() * 2) as u64
        );
    }

    #[test]
    fn frame_count_floors_at_boundary_durations() {
        // One sample shy of 2.0 s must floor to 59 frames, not round to 60.
        let track = silent_track(2 * SAMPLE_RATE as usize - 1);
        let timeline = neutral_timeline(track.duration());
        let synth = small_synth();
        let (container, _) = MemoryContainer::open(false);

        let report =
            run_export(&track, &timeline, &synth, Box::new(container), 30).unwrap();
        assert_eq!(report.total_frames, 59);
    }

    #[test]
    fn export_is_idempotent_across_runs() {
        let track = silent_track(SAMPLE_RATE as usize / 2);
        let timeline = neutral_timeline(0.5);
        let synth = small_synth();

        let reports = [(), ()].map(|_| {
            let (container, _) = MemoryContainer::open(false);
            run_export(&track, &timeline, &synth, Box::new(container), 30).unwrap()
        });
        assert_eq!(reports[0].total_frames, reports[1].total_frames);
        assert_eq!(reports[0].frames_written, reports[1].frames_written);
        assert_eq!(reports[0].frames_dropped, reports[1].frames_dropped);
    }

    struct FlakyRenderer {
        inner: FrameSynthesizer,
        fail_at: u64,
        calls: AtomicU64,
    }

    impl FlakyRenderer {
        fn failing_at(fail_at: u64) -> Self {
            Self {
                inner: small_synth(),
                fail_at,
                calls: AtomicU64::new(0),
            }
        }
    }

    impl FrameRenderer for FlakyRenderer {
        fn frame_len(&self) -> usize {
            self.inner.frame_len()
        }

        fn render(
            &self,
            amplitude: f32,
            emotion: Emotion,
            background: Option<&Path>,
        ) -> Option<Vec<u8>> {
            if self.calls.fetch_add(1, Ordering::Relaxed) == self.fail_at {
                return None;
            }
            self.inner.render(amplitude, emotion, background)
        }
    }

    #[test]
    fn dropped_frame_still_occupies_its_time_slot() {
        // 0.5 s at 30 fps is 15 frames; one render failure must not shorten
        // the stream, or every later frame would land 1/30 s early.
        let track = silent_track(SAMPLE_RATE as usize / 2);
        let timeline = neutral_timeline(0.5);
        let renderer = FlakyRenderer::failing_at(3);
        let (container, counters) = MemoryContainer::open(false);

        let report =
            run_export(&track, &timeline, &renderer, Box::new(container), 30).unwrap();
        assert_eq!(report.total_frames, 15);
        assert_eq!(report.frames_written, 14);
        assert_eq!(report.frames_dropped, 1);
        assert_eq!(counters.video_buffers.load(Ordering::Relaxed), 15);
    }

    #[test]
    fn first_frame_drop_substitutes_a_blank_buffer() {
        let track = silent_track(SAMPLE_RATE as usize / 2);
        let timeline = neutral_timeline(0.5);
        let renderer = FlakyRenderer::failing_at(0);
        let (container, counters) = MemoryContainer::open(false);

        let report =
            run_export(&track, &timeline, &renderer, Box::new(container), 30).unwrap();
        assert_eq!(report.frames_dropped, 1);
        assert_eq!(counters.video_buffers.load(Ordering::Relaxed), 15);
    }

    #[test]
    fn loop_failure_aborts_the_container() {
        let track = silent_track(SAMPLE_RATE as usize / 2);
        let timeline = neutral_timeline(0.5);
        let synth = small_synth();
        let (container, counters) = MemoryContainer::open_with(false, true);

        let error = run_export(&track, &timeline, &synth, Box::new(container), 30)
            .expect_err("dead sink workers must fail the run");
        assert!(
            error.to_string().contains("worker is gone"),
            "unexpected error: {error}"
        );
        assert!(counters.aborted.load(Ordering::Relaxed));
    }

    #[test]
    fn failed_finalize_surfaces_as_error() {
        // Scenario: writer reports a non-success status at finalize.
        let track = silent_track(SAMPLE_RATE as usize / 4);
        let timeline = neutral_timeline(0.25);
        let synth = small_synth();
        let (container, _) = MemoryContainer::open(true);

        let error = run_export(&track, &timeline, &synth, Box::new(container), 30)
            .expect_err("finalize failure must fail the run");
        assert!(error.to_string().contains("finalize"));
    }

    #[test]
    fn sub_frame_audio_is_rejected() {
        let track = silent_track(16);
        let timeline = neutral_timeline(track.duration());
        let synth = small_synth();
        let (container, _) = MemoryContainer::open(false);
        assert!(run_export(&track, &timeline, &synth, Box::new(container), 30).is_err());
    }

    #[test]
    fn audio_reader_chunks_cover_the_track_in_order() {
        let track = silent_track(AUDIO_CHUNK_FRAMES + 100);
        let mut reader = AudioReader::new(&track);
        let mut total = 0usize;
        let mut chunks = 0usize;
        while let Some(chunk) = reader.next_chunk() {
            assert_eq!(chunk.len() % (CHANNELS as usize * 2), 0);
            total += chunk.len();
            chunks += 1;
        }
        assert_eq!(total, track.samples().len() * 2);
        assert_eq!(chunks, 2);
    }

    #[test]
    fn finished_sink_rejects_appends() {
        let (sender, _receiver) = mpsc::sync_channel(1);
        let mut sink = TrackSink::new(sender, "video");
        sink.finish();
        assert!(sink.append(vec![0u8; 4]).is_err());
    }

    #[test]
    fn sinks_can_only_be_taken_once() {
        let (mut container, _) = MemoryContainer::open(false);
        assert!(container.take_video_sink().is_ok());
        assert!(container.take_video_sink().is_err());
    }
}
