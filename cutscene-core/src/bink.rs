// BINK DEMUXER - Pure Rust Bink 1 Container Parser
//
// Bink is RAD Game Tools' cutscene container (.bik).
// Layout: fixed header, audio track table, frame index, frames.
// Every frame carries one packet per audio track followed by
// the video payload, so audio and video arrive interleaved.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::demux::{DemuxError, Demuxer, InputFormat};
use crate::media::{
    ChannelLayout, CodecId, CodecParameters, MediaKind, Packet, Rational, StreamInfo,
};
use crate::pixel_convert::PixelFormat;

// ============================================================================
// Constants
// ============================================================================

const SIGNATURE: &[u8; 3] = b"BIK";
const REVISIONS: &[u8] = b"bdfghik";

const MAX_FRAMES: u32 = 1_000_000;
const MAX_WIDTH: u32 = 7680;
const MAX_HEIGHT: u32 = 4800;
const MAX_AUDIO_TRACKS: u32 = 256;

pub const VIDEO_FLAG_ALPHA: u32 = 0x0010_0000;
pub const AUDIO_FLAG_16BITS: u16 = 0x4000;
pub const AUDIO_FLAG_STEREO: u16 = 0x2000;
pub const AUDIO_FLAG_DCT: u16 = 0x1000;

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinkHeader {
    pub revision: char,
    pub file_size: u64,
    pub frame_count: u32,
    pub largest_frame: u32,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub video_flags: u32,
    pub audio_tracks: Vec<BinkAudioTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinkAudioTrack {
    pub id: u32,
    pub sample_rate: u16,
    pub flags: u16,
}

impl BinkAudioTrack {
    pub fn channels(&self) -> u16 {
        if self.flags & AUDIO_FLAG_STEREO != 0 {
            2
        } else {
            1
        }
    }

    pub fn codec(&self) -> CodecId {
        if self.flags & AUDIO_FLAG_DCT != 0 {
            CodecId::BinkAudioDct
        } else {
            CodecId::BinkAudioRdft
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    offset: u64,
    size: u32,
    keyframe: bool,
}

// ============================================================================
// Input Format
// ============================================================================

/// The `"bink"` input format.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinkFormat;

impl InputFormat for BinkFormat {
    fn name(&self) -> &str {
        "bink"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>, DemuxError> {
        let file = File::open(path)?;
        let demuxer = BinkDemuxer::new(BufReader::new(file))?;
        Ok(Box::new(demuxer))
    }
}

// ============================================================================
// Demuxer
// ============================================================================

pub struct BinkDemuxer<R: Read + Seek> {
    reader: R,
    header: BinkHeader,
    streams: Vec<StreamInfo>,
    index: Vec<IndexEntry>,
    video_pts: u64,
    audio_pts: Vec<i64>,
    /// Next audio track to emit within the current frame; None between frames
    current_track: Option<usize>,
    remaining: u32,
    keyframe: bool,
}

impl<R: Read + Seek> BinkDemuxer<R> {
    pub fn new(mut reader: R) -> Result<Self, DemuxError> {
        let (header, index) = parse_header(&mut reader)?;
        let streams = build_streams(&header);

        debug!(
            "Bink {}: {}x{} @ {}/{} fps, {} frames, {} audio track(s)",
            header.revision,
            header.width,
            header.height,
            header.fps_num,
            header.fps_den,
            header.frame_count,
            header.audio_tracks.len()
        );

        let audio_pts = vec![0; header.audio_tracks.len()];
        Ok(Self {
            reader,
            header,
            streams,
            index,
            video_pts: 0,
            audio_pts,
            current_track: None,
            remaining: 0,
            keyframe: false,
        })
    }

    pub fn header(&self) -> &BinkHeader {
        &self.header
    }

    /// Frame number of the next video packet.
    pub fn position(&self) -> u64 {
        self.video_pts
    }

    fn exhaust(&mut self) {
        self.video_pts = self.index.len() as u64;
        self.current_track = None;
    }

    fn read_next(&mut self) -> Result<Packet, DemuxError> {
        let mut track = match self.current_track {
            Some(track) => track,
            None => {
                let entry = *self
                    .index
                    .get(self.video_pts as usize)
                    .ok_or(DemuxError::EndOfStream)?;
                self.reader.seek(SeekFrom::Start(entry.offset))?;
                self.remaining = entry.size;
                self.keyframe = entry.keyframe;
                self.current_track = Some(0);
                0
            }
        };

        while track < self.header.audio_tracks.len() {
            let size = read_u32_le(&mut self.reader)?;
            if self.remaining < 4 || size > self.remaining - 4 {
                return Err(DemuxError::InvalidPacket {
                    frame: self.video_pts,
                    reason: format!(
                        "audio size in header ({}) > size of packet left ({})",
                        size, self.remaining
                    ),
                });
            }
            self.remaining -= 4 + size;
            track += 1;
            self.current_track = Some(track);

            if size >= 4 {
                let data = read_bytes(&mut self.reader, size as usize)?;
                let slot = track - 1;
                let pts = self.audio_pts[slot];
                // Each audio packet starts with its decoded size in bytes of 16-bit samples
                let decoded = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                let channels = self.header.audio_tracks[slot].channels() as i64;
                self.audio_pts[slot] += decoded as i64 / (2 * channels);

                trace!("audio packet: track {} pts {} size {}", track, pts, size);
                return Ok(Packet {
                    stream_index: track,
                    pts,
                    keyframe: true,
                    data: Bytes::from(data),
                });
            }
            self.reader.seek(SeekFrom::Current(size as i64))?;
        }

        let data = read_bytes(&mut self.reader, self.remaining as usize)?;
        let pts = self.video_pts as i64;
        self.video_pts += 1;
        self.current_track = None;

        trace!("video packet: pts {} size {}", pts, data.len());
        Ok(Packet {
            stream_index: 0,
            pts,
            keyframe: self.keyframe,
            data: Bytes::from(data),
        })
    }
}

impl<R: Read + Seek> Demuxer for BinkDemuxer<R> {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Packet, DemuxError> {
        let result = self.read_next();
        if let Err(ref e) = result {
            if !e.is_end_of_stream() {
                // A damaged frame ends the stream until the next rewind
                debug!("Bink read error at frame {}: {}", self.video_pts, e);
                self.exhaust();
            }
        }
        result
    }

    fn seek_to_start(&mut self) -> Result<(), DemuxError> {
        let first = self.index.first().ok_or(DemuxError::EndOfStream)?;
        self.reader.seek(SeekFrom::Start(first.offset))?;
        self.video_pts = 0;
        self.audio_pts.iter_mut().for_each(|pts| *pts = 0);
        self.current_track = None;
        self.remaining = 0;
        Ok(())
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_header<R: Read + Seek>(reader: &mut R) -> Result<(BinkHeader, Vec<IndexEntry>), DemuxError> {
    let mut signature = [0u8; 4];
    reader.read_exact(&mut signature)?;
    if &signature[..3] != SIGNATURE {
        return Err(DemuxError::BadSignature { format: "Bink" });
    }
    if !REVISIONS.contains(&signature[3]) {
        return Err(DemuxError::UnsupportedRevision(
            String::from_utf8_lossy(&signature).into_owned(),
        ));
    }
    let revision = signature[3] as char;

    let file_size = read_u32_le(reader)? as u64 + 8;
    let frame_count = read_u32_le(reader)?;
    if frame_count == 0 || frame_count > MAX_FRAMES {
        return Err(DemuxError::InvalidHeader(format!("frame count {}", frame_count)));
    }

    let largest_frame = read_u32_le(reader)?;
    if largest_frame as u64 > file_size {
        return Err(DemuxError::InvalidHeader(
            "largest frame size greater than file size".to_string(),
        ));
    }
    skip(reader, 4)?;

    let width = read_u32_le(reader)?;
    let height = read_u32_le(reader)?;
    if width == 0 || width > MAX_WIDTH || height == 0 || height > MAX_HEIGHT {
        return Err(DemuxError::InvalidHeader(format!("dimensions {}x{}", width, height)));
    }

    let fps_num = read_u32_le(reader)?;
    let fps_den = read_u32_le(reader)?;
    if fps_num == 0 || fps_den == 0 {
        return Err(DemuxError::InvalidHeader(format!("frame rate {}/{}", fps_num, fps_den)));
    }

    let video_flags = read_u32_le(reader)?;

    let track_count = read_u32_le(reader)?;
    if track_count > MAX_AUDIO_TRACKS {
        return Err(DemuxError::InvalidHeader(format!("{} audio tracks", track_count)));
    }

    let mut audio_tracks = Vec::with_capacity(track_count as usize);
    if track_count > 0 {
        if revision == 'k' {
            skip(reader, 4)?; // unknown field
        }
        skip(reader, 4 * track_count as i64)?; // max decoded size per track

        for _ in 0..track_count {
            let sample_rate = read_u16_le(reader)?;
            let flags = read_u16_le(reader)?;
            if sample_rate == 0 {
                return Err(DemuxError::InvalidHeader("audio sample rate 0".to_string()));
            }
            audio_tracks.push(BinkAudioTrack { id: 0, sample_rate, flags });
        }
        for track in audio_tracks.iter_mut() {
            track.id = read_u32_le(reader)?;
        }
    }

    let mut index = Vec::with_capacity(frame_count as usize);
    let mut next = read_u32_le(reader)? as u64;
    for frame in 0..frame_count as usize {
        let keyframe = next & 1 != 0;
        let offset = next & !1;
        next = if frame + 1 == frame_count as usize {
            file_size
        } else {
            read_u32_le(reader)? as u64
        };
        let end = next & !1;
        if end <= offset {
            return Err(DemuxError::InvalidIndex { frame });
        }
        let size = u32::try_from(end - offset).map_err(|_| DemuxError::InvalidIndex { frame })?;
        if size > largest_frame {
            return Err(DemuxError::InvalidIndex { frame });
        }
        index.push(IndexEntry { offset, size, keyframe });
    }

    // No frame may claim more than the stream holds
    let stream_len = reader.seek(SeekFrom::End(0))?;
    if largest_frame as u64 > stream_len {
        return Err(DemuxError::InvalidHeader(format!(
            "largest frame size {} greater than stream length {}",
            largest_frame, stream_len
        )));
    }

    let header = BinkHeader {
        revision,
        file_size,
        frame_count,
        largest_frame,
        width,
        height,
        fps_num,
        fps_den,
        video_flags,
        audio_tracks,
    };
    Ok((header, index))
}

fn build_streams(header: &BinkHeader) -> Vec<StreamInfo> {
    let pixel_format = if header.video_flags & VIDEO_FLAG_ALPHA != 0 {
        PixelFormat::YUVA420P
    } else {
        PixelFormat::YUV420P
    };
    let mut video_params =
        CodecParameters::video(CodecId::BinkVideo, header.width, header.height, pixel_format);
    video_params.extradata = header.video_flags.to_le_bytes().to_vec();

    let frame_rate = Rational::new(header.fps_num, header.fps_den);
    let mut streams = vec![StreamInfo {
        index: 0,
        id: 0,
        kind: MediaKind::Video,
        params: video_params,
        time_base: frame_rate.invert(),
        avg_frame_rate: frame_rate,
        frame_count: header.frame_count as u64,
    }];

    for (i, track) in header.audio_tracks.iter().enumerate() {
        let layout = ChannelLayout::from_channels(track.channels());
        streams.push(StreamInfo {
            index: i + 1,
            id: track.id,
            kind: MediaKind::Audio,
            params: CodecParameters::audio(track.codec(), track.sample_rate as u32, layout),
            time_base: Rational::new(1, track.sample_rate as u32),
            avg_frame_rate: Rational::new(0, 1),
            frame_count: 0,
        });
    }
    streams
}

// ============================================================================
// Helper Functions
// ============================================================================

fn read_u32_le<R: Read>(reader: &mut R) -> Result<u32, DemuxError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u16_le<R: Read>(reader: &mut R) -> Result<u16, DemuxError> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, DemuxError> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn skip<R: Seek>(reader: &mut R, bytes: i64) -> Result<(), DemuxError> {
    reader.seek(SeekFrom::Current(bytes))?;
    Ok(())
}
