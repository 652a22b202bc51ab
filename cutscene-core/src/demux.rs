//! Demuxer facade: the input-format / demuxer contract the prober and
//! session drive.

use std::path::Path;

use thiserror::Error;

use crate::media::{Packet, StreamInfo};

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a {format} file")]
    BadSignature { format: &'static str },
    #[error("Unsupported revision: {0:?}")]
    UnsupportedRevision(String),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Invalid frame index table at frame {frame}")]
    InvalidIndex { frame: usize },
    #[error("Frame {frame}: {reason}")]
    InvalidPacket { frame: u64, reason: String },
    #[error("End of stream")]
    EndOfStream,
}

impl DemuxError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// A container format that can open files into demuxers.
pub trait InputFormat: Send + Sync {
    /// Short name used for registry lookup (e.g. "bink")
    fn name(&self) -> &str;

    /// Open `path` and parse the container header.
    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>, DemuxError>;
}

/// An open container handle.
pub trait Demuxer {
    fn streams(&self) -> &[StreamInfo];

    /// Read the next packet in file order. `DemuxError::EndOfStream` once exhausted.
    fn read_packet(&mut self) -> Result<Packet, DemuxError>;

    /// Rewind to the first packet. This is the only seek the pipeline needs.
    fn seek_to_start(&mut self) -> Result<(), DemuxError>;
}
