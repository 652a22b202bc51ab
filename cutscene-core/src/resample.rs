//! # Audio Conversion
//!
//! Two paths for decoded PCM:
//!
//! - [`PcmConverter`]: interleaved f32 to 16-bit integer samples for the
//!   playback device, using a reusable scratch buffer.
//! - [`ReferenceResampler`]: downmix to mono and resample to a fixed rate as
//!   f64, keeping a bounded history for inspection.

use std::collections::VecDeque;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use thiserror::Error;
use tracing::debug;

use crate::decode::{AudioFrame, AudioOutput};
use crate::device::BufferFormat;
use crate::media::SampleFormat;

/// Input frames per resampler call.
pub const REFERENCE_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("Invalid sample rate conversion {input} Hz -> {target} Hz")]
    InvalidRate { input: u32, target: u32 },
    #[error("Invalid channel count {0}")]
    InvalidChannels(u16),
    #[error("Failed to create resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),
    #[error("Resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

// ============================================================================
// f32 -> s16
// ============================================================================

/// Scale a float sample to 16 bits, saturating to [-32768, 32767].
#[inline]
pub fn f32_to_s16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts float frames into device PCM. The scratch buffer grows to the
/// largest frame seen and is reused afterwards.
#[derive(Debug, Clone)]
pub struct PcmConverter {
    scratch: Vec<u8>,
}

impl PcmConverter {
    /// Scratch sized for `channels * samples_per_frame` 32-bit samples.
    pub fn new(channels: usize, samples_per_frame: usize) -> Self {
        Self {
            scratch: vec![0u8; channels * samples_per_frame * 4],
        }
    }

    pub fn capacity(&self) -> usize {
        self.scratch.len()
    }

    /// Convert `frame` to native-endian s16 for `format`. `None` if the
    /// frame is not interleaved f32, does not match the format's channels,
    /// or the format is not 16-bit.
    pub fn convert(&mut self, frame: &AudioFrame, format: BufferFormat) -> Option<&[u8]> {
        if frame.format != SampleFormat::F32
            || frame.channels() != format.channels()
            || format.bytes_per_sample() != 2
        {
            return None;
        }
        let samples = frame.nb_samples * frame.channels();
        let src = frame.data.first()?;
        if src.len() < samples * 4 {
            return None;
        }

        let needed = samples * 4;
        if self.scratch.len() < needed {
            debug!("Growing PCM scratch {} -> {} bytes", self.scratch.len(), needed);
            self.scratch.resize(needed, 0);
        }

        for (raw, out) in src[..samples * 4]
            .chunks_exact(4)
            .zip(self.scratch.chunks_exact_mut(2))
        {
            let value = f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
            out.copy_from_slice(&f32_to_s16(value).to_ne_bytes());
        }
        Some(&self.scratch[..samples * 2])
    }
}

// ============================================================================
// Reference Resampler
// ============================================================================

/// Mono f64 at a fixed rate, built from the decoder's native format.
pub struct ReferenceResampler {
    input: AudioOutput,
    target_rate: u32,
    resampler: FastFixedIn<f64>,
    pending: Vec<f64>,
    history: VecDeque<f64>,
    history_len: usize,
}

impl ReferenceResampler {
    pub fn new(input: AudioOutput, target_rate: u32, history_len: usize) -> Result<Self, ResampleError> {
        if input.sample_rate == 0 || target_rate == 0 {
            return Err(ResampleError::InvalidRate {
                input: input.sample_rate,
                target: target_rate,
            });
        }
        let channels = input.channel_layout.channels();
        if channels == 0 {
            return Err(ResampleError::InvalidChannels(channels));
        }

        let ratio = target_rate as f64 / input.sample_rate as f64;
        let resampler = FastFixedIn::<f64>::new(ratio, 1.0, PolynomialDegree::Cubic, REFERENCE_CHUNK, 1)?;
        debug!(
            "Reference resampler: {} ch @ {} Hz -> mono @ {} Hz",
            channels, input.sample_rate, target_rate
        );

        Ok(Self {
            input,
            target_rate,
            resampler,
            pending: Vec::with_capacity(REFERENCE_CHUNK * 2),
            history: VecDeque::new(),
            history_len,
        })
    }

    pub fn input(&self) -> AudioOutput {
        self.input
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Downmix `frame` and resample whatever full chunks are available.
    /// Returns the number of output samples produced.
    pub fn process(&mut self, frame: &AudioFrame) -> Result<usize, ResampleError> {
        let channels = frame.channels().max(1);
        self.pending.extend((0..frame.nb_samples).map(|i| {
            let sum: f64 = (0..channels).map(|ch| frame.sample_f64(ch, i)).sum();
            sum / channels as f64
        }));

        let mut produced = 0;
        loop {
            let need = self.resampler.input_frames_next();
            if self.pending.len() < need {
                break;
            }
            let chunk: Vec<f64> = self.pending.drain(..need).collect();
            let output = self.resampler.process(&[chunk], None)?;
            for sample in output.into_iter().flatten() {
                self.push_history(sample);
                produced += 1;
            }
        }
        Ok(produced)
    }

    /// Most recent reference samples, oldest first.
    pub fn history(&self) -> Vec<f64> {
        self.history.iter().copied().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Forget buffered input but keep the history.
    pub fn restart(&mut self) {
        self.resampler.reset();
        self.pending.clear();
    }

    /// Forget buffered input and history.
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.pending.clear();
        self.history.clear();
    }

    fn push_history(&mut self, sample: f64) {
        if self.history_len == 0 {
            return;
        }
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }
}
