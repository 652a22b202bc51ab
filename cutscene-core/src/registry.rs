//! Codec registry: input formats by name, decoders by codec id.
//!
//! The pipeline never constructs decoders directly. Hosts register the
//! implementations they have and the session looks them up when a file is
//! loaded.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::bink::BinkFormat;
use crate::decode::{AudioDecoder, DecodeError, VideoDecoder};
use crate::demux::InputFormat;
use crate::media::{CodecId, CodecParameters};

pub type VideoDecoderFactory =
    Box<dyn Fn(&CodecParameters) -> Result<Box<dyn VideoDecoder>, DecodeError> + Send + Sync>;

pub type AudioDecoderFactory =
    Box<dyn Fn(&CodecParameters) -> Result<Box<dyn AudioDecoder>, DecodeError> + Send + Sync>;

#[derive(Default)]
pub struct CodecRegistry {
    formats: HashMap<String, Arc<dyn InputFormat>>,
    video: HashMap<CodecId, VideoDecoderFactory>,
    audio: HashMap<CodecId, AudioDecoderFactory>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in container formats. Decoders still need
    /// to be registered by the host.
    pub fn with_builtin_formats() -> Self {
        let mut registry = Self::new();
        registry.register_format(BinkFormat);
        registry
    }

    pub fn register_format<F: InputFormat + 'static>(&mut self, format: F) {
        let name = format.name().to_string();
        debug!("Registered input format {}", name);
        self.formats.insert(name, Arc::new(format));
    }

    pub fn register_video_decoder<F>(&mut self, codec: CodecId, factory: F)
    where
        F: Fn(&CodecParameters) -> Result<Box<dyn VideoDecoder>, DecodeError> + Send + Sync + 'static,
    {
        self.video.insert(codec, Box::new(factory));
    }

    pub fn register_audio_decoder<F>(&mut self, codec: CodecId, factory: F)
    where
        F: Fn(&CodecParameters) -> Result<Box<dyn AudioDecoder>, DecodeError> + Send + Sync + 'static,
    {
        self.audio.insert(codec, Box::new(factory));
    }

    pub fn input_format(&self, name: &str) -> Option<Arc<dyn InputFormat>> {
        self.formats.get(name).cloned()
    }

    pub fn video_decoder(&self, codec: CodecId) -> Option<&VideoDecoderFactory> {
        self.video.get(&codec)
    }

    pub fn audio_decoder(&self, codec: CodecId) -> Option<&AudioDecoderFactory> {
        self.audio.get(&codec)
    }

    pub fn format_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.formats.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("formats", &self.format_names())
            .field("video", &self.video.keys().collect::<Vec<_>>())
            .field("audio", &self.audio.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeVideoDecoder, VideoScript};

    #[test]
    fn test_builtin_formats() {
        let registry = CodecRegistry::with_builtin_formats();
        assert_eq!(registry.format_names(), vec!["bink"]);
        assert!(registry.input_format("bink").is_some());
        assert!(registry.input_format("avi").is_none());
    }

    #[test]
    fn test_decoder_lookup_by_codec() {
        let mut registry = CodecRegistry::new();
        registry.register_video_decoder(CodecId::BinkVideo, |params| {
            Ok(Box::new(FakeVideoDecoder::new(params, VideoScript::EveryPacket)))
        });

        assert!(registry.video_decoder(CodecId::BinkVideo).is_some());
        assert!(registry.audio_decoder(CodecId::BinkAudioDct).is_none());

        let factory = registry.video_decoder(CodecId::BinkVideo).unwrap();
        let params = CodecParameters::video(
            CodecId::BinkVideo,
            16,
            16,
            crate::pixel_convert::PixelFormat::YUV420P,
        );
        let decoder = factory(&params).unwrap();
        assert_eq!(decoder.output().width, 16);
    }
}
