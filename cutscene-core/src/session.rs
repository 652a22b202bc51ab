//! # Playback Session
//!
//! The tick-driven player. A host calls [`Session::update`] once per frame
//! of its render loop; each call reads exactly one packet and routes it:
//!
//! ```text
//!                    ┌─► video stage ─► color converter ─► surface (locked copy)
//! demuxer ─► packet ─┤
//!                    └─► audio stage ─► pcm converter ─► reclaim ─► submit ─► device
//! ```
//!
//! There is no decode thread. When the container runs dry the session either
//! rewinds (looping) or reports `Tick::EndOfStream` on every later call.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::buffer_queue::{AudioQueue, BufferPool, SubmitOutcome};
use crate::config::{ConfigError, PlaybackConfig};
use crate::decode::{AudioDecodeStage, AudioFrame, DecodeError, VideoDecodeStage};
use crate::demux::Demuxer;
use crate::device::{AudioDevice, BufferFormat, DeviceError};
use crate::media::{ChannelLayout, Packet, Rational};
use crate::pixel_convert::{ColorConverter, ConvertError, PixelFormat, ScaleFilter};
use crate::probe::{probe, ProbeError};
use crate::registry::CodecRegistry;
use crate::resample::{PcmConverter, ReferenceResampler, ResampleError};
use crate::surface::{DisplaySurface, SurfaceError, WriteLock};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("Video decoder: {0}")]
    VideoDecoder(#[source] DecodeError),
    #[error("Audio decoder: {0}")]
    AudioDecoder(#[source] DecodeError),
    #[error("Color converter: {0}")]
    Converter(#[from] ConvertError),
    #[error("Reference resampler: {0}")]
    Resampler(#[from] ResampleError),
    #[error("Display surface: {0}")]
    Surface(#[from] SurfaceError),
    #[error("Unsupported channel layout: {0:?}")]
    UnsupportedChannelLayout(ChannelLayout),
    #[error("Audio device: {0}")]
    Device(#[from] DeviceError),
}

/// What a single `update` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Not running, not valid, or nothing loaded
    Idle,
    /// No packet available and no loop restart
    EndOfStream,
    FramePresented { pts: i64 },
    /// A video packet that produced no picture
    VideoPending,
    Audio { queued: usize, dropped: usize },
    /// Audio packet skipped (muted device or no audio stage)
    AudioSkipped,
    /// Packet of a stream that is not being played
    Ignored { stream_index: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub packets_read: u64,
    pub frames_presented: u64,
    pub video_packets_without_frame: u64,
    pub audio_frames_queued: u64,
    pub audio_frames_dropped: u64,
    pub loop_restarts: u64,
}

// ============================================================================
// Loaded State
// ============================================================================

/// Everything that exists only while a file is loaded.
struct LoadedMedia {
    path: PathBuf,
    demuxer: Box<dyn Demuxer>,
    video_index: usize,
    audio_index: Option<usize>,
    frame_rate: Rational,
    video: VideoDecodeStage,
    converter: ColorConverter,
    audio: Option<AudioPipeline>,
}

struct AudioPipeline {
    stage: AudioDecodeStage,
    reference: ReferenceResampler,
    /// Device side, created from the first decoded frame
    output: Option<AudioOutput>,
}

struct AudioOutput {
    queue: AudioQueue,
    converter: PcmConverter,
}

impl LoadedMedia {
    fn restart(&mut self) {
        self.video.reset();
        if let Some(audio) = &mut self.audio {
            audio.stage.reset();
            audio.reference.restart();
        }
    }

    fn release<D: AudioDevice>(self, device: &mut D) {
        if let Some(output) = self.audio.and_then(|a| a.output) {
            output.queue.release(device);
        }
        debug!("Released {}", self.path.display());
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct Session<S: DisplaySurface, D: AudioDevice> {
    registry: Arc<CodecRegistry>,
    config: PlaybackConfig,
    surface: S,
    device: D,
    media: Option<LoadedMedia>,
    valid: bool,
    running: bool,
    looping: bool,
    last_tick: Option<Instant>,
    stats: PlaybackStats,
}

impl<S: DisplaySurface, D: AudioDevice> Session<S, D> {
    pub fn new(registry: Arc<CodecRegistry>, config: PlaybackConfig, surface: S, device: D) -> Self {
        Self {
            registry,
            config,
            surface,
            device,
            media: None,
            valid: false,
            running: false,
            looping: false,
            last_tick: None,
            stats: PlaybackStats::default(),
        }
    }

    /// Open `path` and build every stage. On error the session stays
    /// invalid and nothing is kept.
    pub fn load<P: AsRef<Path>>(&mut self, path: P, looping: bool) -> Result<(), SessionError> {
        self.close();
        let path = path.as_ref();

        match self.open(path) {
            Ok(media) => {
                info!(
                    "Loaded {}: {:.3} fps, audio: {}, looping: {}",
                    path.display(),
                    media.frame_rate.as_f64(),
                    media.audio.is_some(),
                    looping
                );
                self.media = Some(media);
                self.valid = true;
                self.running = true;
                self.looping = looping;
                self.last_tick = None;
                self.stats = PlaybackStats::default();
                Ok(())
            }
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    fn open(&mut self, path: &Path) -> Result<LoadedMedia, SessionError> {
        self.config.validate()?;
        let probed = probe(&self.registry, &self.config.input_format, path)?;

        let video = VideoDecodeStage::open(&self.registry, probed.video_stream())
            .map_err(SessionError::VideoDecoder)?;
        let out = video.output();
        let (target_w, target_h) = (self.config.target_width, self.config.target_height);
        let converter = ColorConverter::new(
            out.width as usize,
            out.height as usize,
            out.format,
            target_w as usize,
            target_h as usize,
            PixelFormat::RGB32,
            ScaleFilter::Bilinear,
        )?;
        debug!(
            "Converter {}x{} {:?} -> {}x{} RGB32",
            out.width, out.height, out.format, target_w, target_h
        );

        let audio = match probed.audio_stream() {
            Some(stream) => {
                let stage = AudioDecodeStage::open(&self.registry, stream)
                    .map_err(SessionError::AudioDecoder)?;
                let reference = ReferenceResampler::new(
                    stage.output(),
                    self.config.reference_sample_rate,
                    self.config.reference_history_len(),
                )?;
                Some(AudioPipeline {
                    stage,
                    reference,
                    output: None,
                })
            }
            None => None,
        };

        self.surface
            .allocate_streaming(target_w, target_h, PixelFormat::RGB32)?;

        Ok(LoadedMedia {
            path: path.to_path_buf(),
            video_index: probed.video_index,
            audio_index: probed.audio_index,
            frame_rate: probed.frame_rate,
            demuxer: probed.demuxer,
            video,
            converter,
            audio,
        })
    }

    /// Advance playback by one packet.
    pub fn update(&mut self) -> Result<Tick, SessionError> {
        if !self.valid || !self.running {
            return Ok(Tick::Idle);
        }
        self.last_tick = Some(Instant::now());

        match self.step() {
            Ok(tick) => Ok(tick),
            Err(e) => {
                error!("Playback stopped: {}", e);
                self.teardown();
                Err(e)
            }
        }
    }

    fn step(&mut self) -> Result<Tick, SessionError> {
        let Some(media) = self.media.as_mut() else {
            return Ok(Tick::Idle);
        };

        let packet = match media.demuxer.read_packet() {
            Ok(packet) => packet,
            Err(e) if !self.looping => {
                trace!("read_packet: {}", e);
                return Ok(Tick::EndOfStream);
            }
            Err(e) => {
                debug!("Restarting {} ({})", media.path.display(), e);
                if let Err(e) = media.demuxer.seek_to_start() {
                    warn!("Seek to start failed: {}", e);
                    return Ok(Tick::EndOfStream);
                }
                media.restart();
                self.stats.loop_restarts += 1;
                match media.demuxer.read_packet() {
                    Ok(packet) => packet,
                    Err(e) => {
                        debug!("No packet after restart: {}", e);
                        return Ok(Tick::EndOfStream);
                    }
                }
            }
        };
        self.stats.packets_read += 1;

        if packet.stream_index == media.video_index {
            return Ok(present_video(
                &mut media.video,
                &mut media.converter,
                &mut self.surface,
                &packet,
                &mut self.stats,
            ));
        }

        if Some(packet.stream_index) == media.audio_index {
            if self.device.is_muted() {
                return Ok(Tick::AudioSkipped);
            }
            let Some(audio) = media.audio.as_mut() else {
                return Ok(Tick::AudioSkipped);
            };
            return play_audio(audio, &mut self.device, &self.config, &packet, &mut self.stats);
        }

        Ok(Tick::Ignored {
            stream_index: packet.stream_index,
        })
    }

    /// Release everything. No-op when nothing is loaded.
    pub fn close(&mut self) {
        if self.media.is_some() {
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        if let Some(media) = self.media.take() {
            media.release(&mut self.device);
        }
        self.valid = false;
        self.running = false;
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    pub fn resume(&mut self) {
        if self.valid {
            self.running = true;
        }
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// True once a file with an audio stream is loaded.
    pub fn has_audio(&self) -> bool {
        self.media.as_ref().is_some_and(|m| m.audio.is_some())
    }

    /// Nominal frame rate, 0.0 when nothing is loaded.
    pub fn fps(&self) -> f64 {
        self.media.as_ref().map(|m| m.frame_rate.as_f64()).unwrap_or(0.0)
    }

    /// Time between video frames at the nominal rate.
    pub fn frame_interval(&self) -> Option<Duration> {
        let fps = self.fps();
        (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps))
    }

    pub fn last_tick(&self) -> Option<Instant> {
        self.last_tick
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.media.as_ref().map(|m| m.path.as_path())
    }

    /// Buffer pool state once audio output has started.
    pub fn audio_pool(&self) -> Option<&BufferPool> {
        let output = self.media.as_ref()?.audio.as_ref()?.output.as_ref()?;
        Some(output.queue.pool())
    }

    /// Captured mono reference audio, oldest first. Empty unless
    /// `capture_reference_audio` is set.
    pub fn reference_audio(&self) -> Vec<f64> {
        self.media
            .as_ref()
            .and_then(|m| m.audio.as_ref())
            .map(|a| a.reference.history())
            .unwrap_or_default()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<S: DisplaySurface, D: AudioDevice> Drop for Session<S, D> {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Per-packet Work
// ============================================================================

fn present_video<S: DisplaySurface>(
    video: &mut VideoDecodeStage,
    converter: &mut ColorConverter,
    surface: &mut S,
    packet: &Packet,
    stats: &mut PlaybackStats,
) -> Tick {
    let Some(frame) = video.decode(packet) else {
        stats.video_packets_without_frame += 1;
        return Tick::VideoPending;
    };
    let pts = frame.pts;
    let row_bytes = converter.target_size().0 * 4;

    let pixels = match converter.convert(frame) {
        Ok(pixels) => pixels,
        Err(e) => {
            debug!("Frame {} not converted: {}", pts, e);
            stats.video_packets_without_frame += 1;
            return Tick::VideoPending;
        }
    };

    match WriteLock::acquire(surface) {
        Ok(mut lock) => {
            lock.copy_rows(pixels, row_bytes);
        }
        Err(e) => {
            warn!("Failed to lock display surface: {}", e);
            stats.video_packets_without_frame += 1;
            return Tick::VideoPending;
        }
    }

    stats.frames_presented += 1;
    trace!("presented frame {}", pts);
    Tick::FramePresented { pts }
}

fn play_audio<D: AudioDevice>(
    audio: &mut AudioPipeline,
    device: &mut D,
    config: &PlaybackConfig,
    packet: &Packet,
    stats: &mut PlaybackStats,
) -> Result<Tick, SessionError> {
    let AudioPipeline {
        stage,
        reference,
        output,
    } = audio;

    if !stage.send(packet) {
        return Ok(Tick::Audio { queued: 0, dropped: 0 });
    }

    let (mut queued, mut dropped) = (0, 0);
    while let Some(frame) = stage.receive() {
        if output.is_none() {
            *output = Some(open_output(frame, device, config)?);
        }
        let Some(out) = output.as_mut() else {
            break;
        };

        if config.capture_reference_audio {
            if let Err(e) = reference.process(frame) {
                debug!("Reference resample failed: {}", e);
            }
        }

        out.queue.reclaim(device);
        let Some(pcm) = out.converter.convert(frame, out.queue.format()) else {
            trace!("dropping {:?} audio frame", frame.format);
            dropped += 1;
            continue;
        };

        match out.queue.submit(device, pcm) {
            SubmitOutcome::Queued(_) => queued += 1,
            SubmitOutcome::Dropped | SubmitOutcome::Failed => dropped += 1,
        }
    }

    stats.audio_frames_queued += queued as u64;
    stats.audio_frames_dropped += dropped as u64;
    Ok(Tick::Audio { queued, dropped })
}

/// One-time device setup from the first decoded frame.
fn open_output<D: AudioDevice>(
    frame: &AudioFrame,
    device: &mut D,
    config: &PlaybackConfig,
) -> Result<AudioOutput, SessionError> {
    let layout = frame.channel_layout;
    let format = BufferFormat::for_layout(layout, frame.format)
        .ok_or(SessionError::UnsupportedChannelLayout(layout))?;

    let queue = AudioQueue::create(
        device,
        config.audio_buffer_count,
        format,
        frame.sample_rate,
        config.submit_trim_bytes,
    )?;
    let converter = PcmConverter::new(format.channels(), frame.nb_samples);

    info!(
        "Audio output: {:?} @ {} Hz, {} buffers",
        format, frame.sample_rate, config.audio_buffer_count
    );
    Ok(AudioOutput { queue, converter })
}
