//! Stream metadata and packet types shared by the demuxer, decoders and session.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::pixel_convert::PixelFormat;

// ============================================================================
// Stream Kinds / Codecs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Codec identities the pipeline knows how to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    BinkVideo,
    BinkAudioRdft,
    BinkAudioDct,
}

impl CodecId {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::BinkVideo => MediaKind::Video,
            Self::BinkAudioRdft | Self::BinkAudioDct => MediaKind::Audio,
        }
    }
}

/// A rational number (frame rates, time bases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// `num / den` as a float, or 0.0 for a zero denominator.
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    pub fn invert(&self) -> Self {
        Self::new(self.den, self.num)
    }
}

// ============================================================================
// Audio Layouts / Sample Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    /// Any other layout, by channel count.
    Other(u16),
}

impl ChannelLayout {
    pub fn from_channels(channels: u16) -> Self {
        match channels {
            1 => Self::Mono,
            2 => Self::Stereo,
            n => Self::Other(n),
        }
    }

    pub fn channels(&self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Other(n) => *n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    /// Interleaved 32-bit float
    F32,
    /// Planar 32-bit float (one plane per channel)
    F32Planar,
    F64,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::F32 | Self::F32Planar => 4,
            Self::F64 => 8,
        }
    }

    pub fn is_planar(&self) -> bool {
        matches!(self, Self::F32Planar)
    }
}

// ============================================================================
// Codec Parameters / Streams
// ============================================================================

/// Parameters a decoder is opened with. Video fields are zero/None for audio
/// streams and vice versa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecParameters {
    pub codec: CodecId,
    pub width: u32,
    pub height: u32,
    pub pixel_format: Option<PixelFormat>,
    pub sample_rate: u32,
    pub channel_layout: Option<ChannelLayout>,
    pub sample_format: Option<SampleFormat>,
    pub extradata: Vec<u8>,
}

impl CodecParameters {
    pub fn video(codec: CodecId, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            codec,
            width,
            height,
            pixel_format: Some(pixel_format),
            sample_rate: 0,
            channel_layout: None,
            sample_format: None,
            extradata: Vec::new(),
        }
    }

    pub fn audio(codec: CodecId, sample_rate: u32, channel_layout: ChannelLayout) -> Self {
        Self {
            codec,
            width: 0,
            height: 0,
            pixel_format: None,
            sample_rate,
            channel_layout: Some(channel_layout),
            sample_format: None,
            extradata: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    /// Container-level stream id (Bink audio track id; 0 for video)
    pub id: u32,
    pub kind: MediaKind,
    pub params: CodecParameters,
    pub time_base: Rational,
    pub avg_frame_rate: Rational,
    /// Number of frames (video) or 0 when unknown
    pub frame_count: u64,
}

/// Pick the preferred stream of `kind`: the first one the container lists.
pub fn find_best_stream(streams: &[StreamInfo], kind: MediaKind) -> Option<usize> {
    streams.iter().find(|s| s.kind == kind).map(|s| s.index)
}

// ============================================================================
// Packets
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in the stream's time base
    pub pts: i64,
    pub keyframe: bool,
    pub data: Bytes,
}
