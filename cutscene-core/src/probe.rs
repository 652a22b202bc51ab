//! Format prober: open a path with a registered input format and pick the
//! streams to play.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::demux::{DemuxError, Demuxer};
use crate::media::{find_best_stream, MediaKind, Rational, StreamInfo};
use crate::registry::CodecRegistry;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Input format '{0}' is not registered")]
    FormatNotFound(String),
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: DemuxError,
    },
    #[error("Invalid stream info: {0}")]
    StreamInfo(String),
    #[error("No video stream")]
    NoVideoStream,
}

/// An opened container with its selected streams.
pub struct ProbedInput {
    pub demuxer: Box<dyn Demuxer>,
    pub video_index: usize,
    pub audio_index: Option<usize>,
    pub frame_rate: Rational,
}

impl ProbedInput {
    pub fn fps(&self) -> f64 {
        self.frame_rate.as_f64()
    }

    pub fn video_stream(&self) -> &StreamInfo {
        &self.demuxer.streams()[self.video_index]
    }

    pub fn audio_stream(&self) -> Option<&StreamInfo> {
        self.audio_index.map(|i| &self.demuxer.streams()[i])
    }
}

impl std::fmt::Debug for ProbedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbedInput")
            .field("video_index", &self.video_index)
            .field("audio_index", &self.audio_index)
            .field("frame_rate", &self.frame_rate)
            .finish()
    }
}

pub fn probe(registry: &CodecRegistry, format: &str, path: &Path) -> Result<ProbedInput, ProbeError> {
    let input = registry
        .input_format(format)
        .ok_or_else(|| ProbeError::FormatNotFound(format.to_string()))?;

    let demuxer = input.open(path).map_err(|source| ProbeError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let streams = demuxer.streams();
    validate_streams(streams)?;

    let video_index = find_best_stream(streams, MediaKind::Video).ok_or(ProbeError::NoVideoStream)?;
    let audio_index = find_best_stream(streams, MediaKind::Audio);
    let frame_rate = streams[video_index].avg_frame_rate;

    info!(
        "Probed {}: video stream {} @ {:.3} fps, audio stream {:?}",
        path.display(),
        video_index,
        frame_rate.as_f64(),
        audio_index
    );

    Ok(ProbedInput {
        demuxer,
        video_index,
        audio_index,
        frame_rate,
    })
}

fn validate_streams(streams: &[StreamInfo]) -> Result<(), ProbeError> {
    for (i, stream) in streams.iter().enumerate() {
        if stream.index != i {
            return Err(ProbeError::StreamInfo(format!(
                "stream {} reports index {}",
                i, stream.index
            )));
        }
        if stream.params.codec.kind() != stream.kind {
            return Err(ProbeError::StreamInfo(format!(
                "stream {} is {:?} but carries {:?}",
                i, stream.kind, stream.params.codec
            )));
        }
        match stream.kind {
            MediaKind::Video => {
                if stream.params.width == 0 || stream.params.height == 0 {
                    return Err(ProbeError::StreamInfo(format!("stream {} has no dimensions", i)));
                }
                if stream.avg_frame_rate.den == 0 {
                    return Err(ProbeError::StreamInfo(format!("stream {} has no frame rate", i)));
                }
            }
            MediaKind::Audio => {
                if stream.params.sample_rate == 0 {
                    return Err(ProbeError::StreamInfo(format!("stream {} has no sample rate", i)));
                }
            }
        }
        debug!("stream {}: {:?} {:?}", i, stream.kind, stream.params.codec);
    }
    Ok(())
}
