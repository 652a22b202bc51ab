//! # cpal Output Device
//!
//! OpenAL-style sources and buffers mixed into the default cpal output
//! stream. The output callback walks each playing source's queue, steps
//! through the current buffer at its own rate and marks buffers processed
//! when they run out.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::device::{AudioDevice, BufferFormat, BufferId, DeviceError, SourceId, SourceParams};

// ============================================================================
// Mixer
// ============================================================================

#[derive(Debug, Clone, Default)]
struct StoredBuffer {
    /// Interleaved samples in [-1, 1]
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl StoredBuffer {
    fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

#[derive(Debug, Clone)]
struct MixSource {
    queue: VecDeque<BufferId>,
    /// Finished buffers at the front of `queue`
    processed: usize,
    /// Read position in frames within the current buffer
    cursor: f64,
    playing: bool,
    params: SourceParams,
}

/// Source and buffer state shared with the output callback.
#[derive(Debug, Default)]
pub(crate) struct Mixer {
    next_id: u32,
    buffers: HashMap<BufferId, StoredBuffer>,
    sources: HashMap<SourceId, MixSource>,
    muted: bool,
}

impl Mixer {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn source_mut(&mut self, source: SourceId) -> Result<&mut MixSource, DeviceError> {
        self.sources.get_mut(&source).ok_or(DeviceError::UnknownSource(source))
    }

    fn source(&self, source: SourceId) -> Result<&MixSource, DeviceError> {
        self.sources.get(&source).ok_or(DeviceError::UnknownSource(source))
    }

    fn is_attached(&self, buffer: BufferId) -> bool {
        self.sources.values().any(|s| s.queue.contains(&buffer))
    }

    pub(crate) fn create_source(&mut self, params: SourceParams) -> SourceId {
        let id = SourceId(self.alloc_id());
        self.sources.insert(
            id,
            MixSource {
                queue: VecDeque::new(),
                processed: 0,
                cursor: 0.0,
                playing: false,
                params,
            },
        );
        id
    }

    pub(crate) fn delete_source(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.sources.remove(&source).map(|_| ()).ok_or(DeviceError::UnknownSource(source))
    }

    pub(crate) fn create_buffers(&mut self, count: usize) -> Vec<BufferId> {
        (0..count)
            .map(|_| {
                let id = BufferId(self.alloc_id());
                self.buffers.insert(id, StoredBuffer::default());
                id
            })
            .collect()
    }

    pub(crate) fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<(), DeviceError> {
        if let Some(id) = buffers.iter().find(|id| self.is_attached(**id)) {
            return Err(DeviceError::BufferInUse(*id));
        }
        for id in buffers {
            self.buffers.remove(id).ok_or(DeviceError::UnknownBuffer(*id))?;
        }
        Ok(())
    }

    pub(crate) fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        if self.is_attached(buffer) {
            return Err(DeviceError::BufferInUse(buffer));
        }
        if sample_rate == 0 || data.len() % format.frame_bytes() != 0 {
            return Err(DeviceError::InvalidData(format!(
                "{} bytes of {:?} @ {} Hz",
                data.len(),
                format,
                sample_rate
            )));
        }
        let samples = match format.bytes_per_sample() {
            1 => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
            _ => data
                .chunks_exact(2)
                .map(|b| i16::from_ne_bytes([b[0], b[1]]) as f32 / 32768.0)
                .collect(),
        };
        let stored = self.buffers.get_mut(&buffer).ok_or(DeviceError::UnknownBuffer(buffer))?;
        *stored = StoredBuffer {
            samples,
            channels: format.channels(),
            sample_rate,
        };
        Ok(())
    }

    pub(crate) fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError> {
        if let Some(id) = buffers.iter().find(|id| !self.buffers.contains_key(id)) {
            return Err(DeviceError::UnknownBuffer(*id));
        }
        self.source_mut(source)?.queue.extend(buffers.iter().copied());
        Ok(())
    }

    pub(crate) fn unqueue_buffer(&mut self, source: SourceId) -> Result<Option<BufferId>, DeviceError> {
        let src = self.source_mut(source)?;
        if src.processed == 0 {
            return Ok(None);
        }
        src.processed -= 1;
        Ok(src.queue.pop_front())
    }

    /// Mix every playing source into `out` (interleaved, `channels` wide).
    pub(crate) fn mix(&mut self, out: &mut [f32], channels: usize, rate: u32) {
        out.fill(0.0);
        if channels == 0 || rate == 0 {
            return;
        }
        let muted = self.muted;
        let buffers = &self.buffers;

        for src in self.sources.values_mut().filter(|s| s.playing) {
            for frame in out.chunks_exact_mut(channels) {
                // Advance past exhausted buffers
                let current = loop {
                    let Some(id) = src.queue.get(src.processed) else {
                        break None;
                    };
                    match buffers.get(id) {
                        Some(buffer) if (src.cursor as usize) < buffer.frames() => break Some(buffer),
                        _ => {
                            src.processed += 1;
                            src.cursor = 0.0;
                        }
                    }
                };
                let Some(buffer) = current else {
                    src.playing = false;
                    break;
                };
                let index = src.cursor as usize;

                if !muted {
                    let base = index * buffer.channels;
                    for (ch, sample) in frame.iter_mut().enumerate() {
                        let value = match buffer.channels {
                            1 => buffer.samples[base],
                            _ if channels == 1 => {
                                (buffer.samples[base] + buffer.samples[base + 1]) * 0.5
                            }
                            n => buffer.samples[base + ch.min(n - 1)],
                        };
                        *sample += value * src.params.gain;
                    }
                }
                src.cursor += buffer.sample_rate as f64 * src.params.pitch as f64 / rate as f64;
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

// ============================================================================
// Device
// ============================================================================

/// Audio device backed by the system's default cpal output.
pub struct CpalDevice {
    mixer: Arc<Mutex<Mixer>>,
    _stream: Stream,
    channels: usize,
    sample_rate: u32,
}

impl CpalDevice {
    /// Open the default output device and start its stream.
    pub fn open_default() -> Result<Self, DeviceError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| DeviceError::Unavailable("No default output device found".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| DeviceError::Unavailable(format!("Failed to get output config: {}", e)))?;

        let sample_format = config.sample_format();
        let config: StreamConfig = config.into();
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;
        let mixer = Arc::new(Mutex::new(Mixer::default()));

        let stream = build_stream(&device, &config, sample_format, mixer.clone())?;
        stream
            .play()
            .map_err(|e| DeviceError::Unavailable(format!("Failed to start stream: {}", e)))?;

        info!(
            "Audio output: {} ch @ {} Hz ({:?})",
            channels, sample_rate, sample_format
        );
        Ok(Self {
            mixer,
            _stream: stream,
            channels,
            sample_rate,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_muted(&mut self, muted: bool) {
        debug!("Audio muted: {}", muted);
        self.mixer.lock().muted = muted;
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<Stream, DeviceError> {
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;
    let err_fn = |err| error!("Audio stream error: {}", err);
    let mut scratch: Vec<f32> = Vec::new();

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mixer.lock().mix(data, channels, rate);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.lock().mix(&mut scratch, channels, rate);
                for (out, s) in data.iter_mut().zip(&scratch) {
                    *out = (s * i16::MAX as f32) as i16;
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.lock().mix(&mut scratch, channels, rate);
                for (out, s) in data.iter_mut().zip(&scratch) {
                    *out = ((s + 1.0) * 0.5 * u16::MAX as f32) as u16;
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(DeviceError::Unavailable(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| DeviceError::Unavailable(format!("Failed to build stream: {}", e)))
}

impl AudioDevice for CpalDevice {
    fn create_source(&mut self, params: SourceParams) -> Result<SourceId, DeviceError> {
        Ok(self.mixer.lock().create_source(params))
    }

    fn delete_source(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.mixer.lock().delete_source(source)
    }

    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        Ok(self.mixer.lock().create_buffers(count))
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<(), DeviceError> {
        self.mixer.lock().delete_buffers(buffers)
    }

    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        self.mixer.lock().buffer_data(buffer, format, data, sample_rate)
    }

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError> {
        self.mixer.lock().queue_buffers(source, buffers)
    }

    fn unqueue_buffer(&mut self, source: SourceId) -> Result<Option<BufferId>, DeviceError> {
        self.mixer.lock().unqueue_buffer(source)
    }

    fn buffers_processed(&self, source: SourceId) -> Result<usize, DeviceError> {
        Ok(self.mixer.lock().source(source)?.processed)
    }

    fn buffers_queued(&self, source: SourceId) -> Result<usize, DeviceError> {
        Ok(self.mixer.lock().source(source)?.queue.len())
    }

    fn play(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.mixer.lock().source_mut(source)?.playing = true;
        Ok(())
    }

    // Pauses in place; queued buffers stay pending
    fn stop(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.mixer.lock().source_mut(source)?.playing = false;
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.mixer.lock().muted
    }
}
