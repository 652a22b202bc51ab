//! # Decode Stages
//!
//! Decoder contracts and the two stages the session drives:
//!
//! - [`VideoDecodeStage`]: one packet in, at most one picture out
//! - [`AudioDecodeStage`]: one packet in, any number of PCM frames out
//!
//! Decoders follow a send/receive model. `DecodeError::Again` and
//! `DecodeError::Eof` are normal transient states, not failures.

use thiserror::Error;
use tracing::{debug, trace};

use crate::media::{ChannelLayout, CodecId, Packet, SampleFormat, StreamInfo};
use crate::pixel_convert::{PixelFormat, VideoFrame};
use crate::registry::CodecRegistry;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Need more data")]
    Again,
    #[error("End of stream")]
    Eof,
    #[error("No decoder available for {0:?}")]
    NoDecoder(CodecId),
    #[error("Failed to open decoder: {0}")]
    Open(String),
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
}

impl DecodeError {
    /// True for the "nothing this tick" states.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Again | Self::Eof)
    }
}

// ============================================================================
// Decoder Contracts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoOutput {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioOutput {
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub sample_format: SampleFormat,
}

/// An opened video decoder.
pub trait VideoDecoder: Send {
    fn name(&self) -> &str;

    /// Geometry of the frames this decoder produces.
    fn output(&self) -> VideoOutput;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError>;

    /// Write the next picture into `frame`, reshaping it if needed.
    fn receive_frame(&mut self, frame: &mut VideoFrame) -> Result<(), DecodeError>;

    /// Drop any buffered state (used when playback loops).
    fn reset(&mut self);
}

/// An opened audio decoder.
pub trait AudioDecoder: Send {
    fn name(&self) -> &str;

    /// Native output format of this decoder.
    fn output(&self) -> AudioOutput;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError>;

    fn receive_frame(&mut self, frame: &mut AudioFrame) -> Result<(), DecodeError>;

    fn reset(&mut self);
}

// ============================================================================
// Audio Frame
// ============================================================================

/// Decoded PCM. Interleaved formats use a single data buffer, planar formats
/// one buffer per channel.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub format: SampleFormat,
    pub channel_layout: ChannelLayout,
    pub sample_rate: u32,
    /// Samples per channel
    pub nb_samples: usize,
    pub data: Vec<Vec<u8>>,
    pub pts: i64,
}

impl AudioFrame {
    pub fn empty() -> Self {
        Self {
            format: SampleFormat::F32,
            channel_layout: ChannelLayout::Mono,
            sample_rate: 0,
            nb_samples: 0,
            data: Vec::new(),
            pts: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channel_layout.channels() as usize
    }

    /// Overwrite this frame with interleaved f32 samples.
    pub fn fill_f32(&mut self, samples: &[f32], layout: ChannelLayout, sample_rate: u32) {
        let channels = layout.channels().max(1) as usize;
        self.format = SampleFormat::F32;
        self.channel_layout = layout;
        self.sample_rate = sample_rate;
        self.nb_samples = samples.len() / channels;
        self.data.resize(1, Vec::new());
        self.data[0].clear();
        self.data[0].extend(samples.iter().flat_map(|s| s.to_ne_bytes()));
    }

    /// Sample `index` of `channel` as f64 in [-1, 1], for any sample format.
    pub fn sample_f64(&self, channel: usize, index: usize) -> f64 {
        let channels = self.channels();
        let (plane, slot) = if self.format.is_planar() {
            (channel, index)
        } else {
            (0, index * channels + channel)
        };
        let Some(bytes) = self.data.get(plane) else {
            return 0.0;
        };
        let size = self.format.bytes_per_sample();
        let Some(raw) = bytes.get(slot * size..(slot + 1) * size) else {
            return 0.0;
        };
        match self.format {
            SampleFormat::U8 => (raw[0] as f64 - 128.0) / 128.0,
            SampleFormat::S16 => i16::from_ne_bytes([raw[0], raw[1]]) as f64 / 32768.0,
            SampleFormat::S32 => {
                i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64 / 2147483648.0
            }
            SampleFormat::F32 | SampleFormat::F32Planar => {
                f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64
            }
            SampleFormat::F64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                f64::from_ne_bytes(buf)
            }
        }
    }
}

// ============================================================================
// Video Decode Stage
// ============================================================================

/// The only video codec the pipeline targets.
pub const VIDEO_CODEC: CodecId = CodecId::BinkVideo;

/// Bink video needs its 4-byte flags word as extra data.
pub const VIDEO_EXTRADATA_LEN: usize = 4;

pub struct VideoDecodeStage {
    decoder: Box<dyn VideoDecoder>,
    frame: VideoFrame,
}

impl VideoDecodeStage {
    pub fn open(registry: &CodecRegistry, stream: &StreamInfo) -> Result<Self, DecodeError> {
        let factory = registry
            .video_decoder(VIDEO_CODEC)
            .ok_or(DecodeError::NoDecoder(VIDEO_CODEC))?;

        let mut params = stream.params.clone();
        if params.extradata.len() < VIDEO_EXTRADATA_LEN {
            params.extradata = vec![0u8; VIDEO_EXTRADATA_LEN];
        }
        params.extradata.truncate(VIDEO_EXTRADATA_LEN);

        let decoder = factory(&params)?;
        debug!("Opened video decoder {}", decoder.name());
        Ok(Self {
            decoder,
            frame: VideoFrame::empty(),
        })
    }

    pub fn output(&self) -> VideoOutput {
        self.decoder.output()
    }

    pub fn decoder_name(&self) -> &str {
        self.decoder.name()
    }

    /// Submit one packet and try to pull one picture. `None` means no
    /// picture this tick, whatever the reason.
    pub fn decode(&mut self, packet: &Packet) -> Option<&VideoFrame> {
        if let Err(e) = self.decoder.send_packet(packet) {
            trace!("video send_packet rejected pts {}: {}", packet.pts, e);
            return None;
        }
        match self.decoder.receive_frame(&mut self.frame) {
            Ok(()) => Some(&self.frame),
            Err(e) if e.is_transient() => None,
            Err(e) => {
                debug!("{} decode error at pts {}: {}", self.decoder.name(), packet.pts, e);
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.decoder.reset();
    }
}

// ============================================================================
// Audio Decode Stage
// ============================================================================

pub struct AudioDecodeStage {
    decoder: Box<dyn AudioDecoder>,
    frame: AudioFrame,
}

impl AudioDecodeStage {
    pub fn open(registry: &CodecRegistry, stream: &StreamInfo) -> Result<Self, DecodeError> {
        let codec = stream.params.codec;
        let factory = registry
            .audio_decoder(codec)
            .ok_or(DecodeError::NoDecoder(codec))?;
        let decoder = factory(&stream.params)?;
        debug!("Opened audio decoder {}", decoder.name());
        Ok(Self {
            decoder,
            frame: AudioFrame::empty(),
        })
    }

    pub fn output(&self) -> AudioOutput {
        self.decoder.output()
    }

    /// Submit a packet. Returns false if the decoder rejected it.
    pub fn send(&mut self, packet: &Packet) -> bool {
        match self.decoder.send_packet(packet) {
            Ok(()) => true,
            Err(e) => {
                trace!("audio send_packet rejected pts {}: {}", packet.pts, e);
                false
            }
        }
    }

    /// Pull the next decoded frame, if any.
    pub fn receive(&mut self) -> Option<&AudioFrame> {
        match self.decoder.receive_frame(&mut self.frame) {
            Ok(()) => Some(&self.frame),
            Err(e) if e.is_transient() => None,
            Err(e) => {
                debug!("{} decode error: {}", self.decoder.name(), e);
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.decoder.reset();
    }
}
