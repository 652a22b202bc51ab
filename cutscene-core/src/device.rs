//! # Audio Device Contract
//!
//! An OpenAL-style output device: sources own a queue of buffers, buffers
//! hold uploaded PCM, and the device reports how many queued buffers have
//! finished playing.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::media::{ChannelLayout, SampleFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// PCM layouts a device buffer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferFormat {
    Mono8,
    Mono16,
    Stereo8,
    Stereo16,
}

impl BufferFormat {
    /// Device format for a decoded layout. Only mono and stereo are playable;
    /// unsigned 8-bit sources stay 8-bit, everything else is sent as 16-bit.
    pub fn for_layout(layout: ChannelLayout, sample_format: SampleFormat) -> Option<Self> {
        let eight_bit = sample_format == SampleFormat::U8;
        match (layout, eight_bit) {
            (ChannelLayout::Mono, true) => Some(Self::Mono8),
            (ChannelLayout::Mono, false) => Some(Self::Mono16),
            (ChannelLayout::Stereo, true) => Some(Self::Stereo8),
            (ChannelLayout::Stereo, false) => Some(Self::Stereo16),
            (ChannelLayout::Other(_), _) => None,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::Mono8 | Self::Mono16 => 1,
            Self::Stereo8 | Self::Stereo16 => 2,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Mono8 | Self::Stereo8 => 1,
            Self::Mono16 | Self::Stereo16 => 2,
        }
    }

    /// Bytes per sample frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.channels() * self.bytes_per_sample()
    }
}

/// Initial source placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceParams {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub pitch: f32,
    pub gain: f32,
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            velocity: [0.0; 3],
            pitch: 1.0,
            gain: 1.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Unknown source {0:?}")]
    UnknownSource(SourceId),
    #[error("Unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("Buffer {0:?} is queued on a source")]
    BufferInUse(BufferId),
    #[error("Invalid buffer data: {0}")]
    InvalidData(String),
    #[error("Device out of resources")]
    OutOfResources,
    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

pub trait AudioDevice {
    fn create_source(&mut self, params: SourceParams) -> Result<SourceId, DeviceError>;
    fn delete_source(&mut self, source: SourceId) -> Result<(), DeviceError>;

    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError>;
    fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<(), DeviceError>;

    /// Upload PCM into a buffer that is not currently queued.
    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), DeviceError>;

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError>;

    /// Remove the oldest finished buffer from the source queue.
    fn unqueue_buffer(&mut self, source: SourceId) -> Result<Option<BufferId>, DeviceError>;

    /// Queued buffers that have finished playing.
    fn buffers_processed(&self, source: SourceId) -> Result<usize, DeviceError>;

    /// Buffers still attached to the source, processed or not.
    fn buffers_queued(&self, source: SourceId) -> Result<usize, DeviceError>;

    fn play(&mut self, source: SourceId) -> Result<(), DeviceError>;
    fn stop(&mut self, source: SourceId) -> Result<(), DeviceError>;

    /// Global mute; audio decoding is skipped while set.
    fn is_muted(&self) -> bool;
}

/// Log a failed device call and carry on.
pub(crate) fn log_device_error<T>(op: &str, result: Result<T, DeviceError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Audio device {} failed: {}", op, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_for_layout() {
        assert_eq!(
            BufferFormat::for_layout(ChannelLayout::Mono, SampleFormat::F32),
            Some(BufferFormat::Mono16)
        );
        assert_eq!(
            BufferFormat::for_layout(ChannelLayout::Stereo, SampleFormat::U8),
            Some(BufferFormat::Stereo8)
        );
        assert_eq!(
            BufferFormat::for_layout(ChannelLayout::Stereo, SampleFormat::F32Planar),
            Some(BufferFormat::Stereo16)
        );
        assert_eq!(BufferFormat::for_layout(ChannelLayout::Other(6), SampleFormat::F32), None);
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(BufferFormat::Mono8.frame_bytes(), 1);
        assert_eq!(BufferFormat::Stereo16.frame_bytes(), 4);
    }

    #[test]
    fn test_log_device_error_passes_values() {
        assert_eq!(log_device_error("play", Ok(3)), Some(3));
        assert_eq!(
            log_device_error::<()>("play", Err(DeviceError::UnknownSource(SourceId(1)))),
            None
        );
    }
}
