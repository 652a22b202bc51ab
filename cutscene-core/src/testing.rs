//! Test fixtures: a synthetic Bink writer, scripted decoders, a scripted
//! container and an in-memory OpenAL-style device.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::decode::{AudioDecoder, AudioFrame, AudioOutput, DecodeError, VideoDecoder, VideoOutput};
use crate::demux::{DemuxError, Demuxer, InputFormat};
use crate::device::{AudioDevice, BufferFormat, BufferId, DeviceError, SourceId, SourceParams};
use crate::media::{ChannelLayout, CodecParameters, Packet, SampleFormat, StreamInfo};
use crate::pixel_convert::{PixelFormat, VideoFrame};

// ============================================================================
// Bink Writer
// ============================================================================

struct BuiltFrame {
    keyframe: bool,
    video: Vec<u8>,
    audio: Vec<Vec<u8>>,
}

/// Writes minimal Bink containers. Payloads are opaque; the scripted
/// decoders below never look inside them.
pub struct BinkBuilder {
    revision: u8,
    width: u32,
    height: u32,
    fps: (u32, u32),
    video_flags: u32,
    tracks: Vec<(u16, u16)>,
    frames: Vec<BuiltFrame>,
}

impl BinkBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            revision: b'i',
            width,
            height,
            fps: (15, 1),
            video_flags: 0,
            tracks: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn fps(mut self, num: u32, den: u32) -> Self {
        self.fps = (num, den);
        self
    }

    pub fn revision(mut self, revision: u8) -> Self {
        self.revision = revision;
        self
    }

    pub fn video_flags(mut self, flags: u32) -> Self {
        self.video_flags = flags;
        self
    }

    pub fn audio_track(mut self, sample_rate: u16, flags: u16) -> Self {
        self.tracks.push((sample_rate, flags));
        self
    }

    pub fn frame(mut self, keyframe: bool, video: Vec<u8>, audio: Vec<Vec<u8>>) -> Self {
        self.frames.push(BuiltFrame { keyframe, video, audio });
        self
    }

    /// `count` frames, each with a 16-byte video payload and one audio packet
    /// per track announcing 1024 decoded samples per channel.
    pub fn with_frames(mut self, count: usize) -> Self {
        for i in 0..count {
            let audio = self
                .tracks
                .iter()
                .map(|&(_, flags)| {
                    let channels: u32 = if flags & crate::bink::AUDIO_FLAG_STEREO != 0 { 2 } else { 1 };
                    let mut payload = (1024 * 2 * channels).to_le_bytes().to_vec();
                    payload.extend_from_slice(&(i as u32).to_le_bytes());
                    payload
                })
                .collect();
            self.frames.push(BuiltFrame {
                keyframe: i == 0,
                video: vec![i as u8; 16],
                audio,
            });
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let track_count = self.tracks.len();
        let mut header = Vec::new();
        header.extend_from_slice(b"BIK");
        header.push(self.revision);
        header.extend_from_slice(&0u32.to_le_bytes()); // file size, patched below
        header.extend_from_slice(&(self.frames.len() as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // largest frame, patched below
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&self.width.to_le_bytes());
        header.extend_from_slice(&self.height.to_le_bytes());
        header.extend_from_slice(&self.fps.0.to_le_bytes());
        header.extend_from_slice(&self.fps.1.to_le_bytes());
        header.extend_from_slice(&self.video_flags.to_le_bytes());
        header.extend_from_slice(&(track_count as u32).to_le_bytes());
        if track_count > 0 {
            if self.revision == b'k' {
                header.extend_from_slice(&0u32.to_le_bytes());
            }
            for _ in 0..track_count {
                header.extend_from_slice(&4096u32.to_le_bytes());
            }
            for &(rate, flags) in &self.tracks {
                header.extend_from_slice(&rate.to_le_bytes());
                header.extend_from_slice(&flags.to_le_bytes());
            }
            for id in 0..track_count as u32 {
                header.extend_from_slice(&id.to_le_bytes());
            }
        }

        let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(self.frames.len());
        for frame in &self.frames {
            let mut body = Vec::new();
            for i in 0..track_count {
                let payload = frame.audio.get(i).map(Vec::as_slice).unwrap_or(&[]);
                body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                body.extend_from_slice(payload);
            }
            body.extend_from_slice(&frame.video);
            if body.len() % 2 != 0 {
                body.push(0);
            }
            bodies.push(body);
        }

        let index_len = 4 * self.frames.len();
        let mut offset = (header.len() + index_len) as u32;
        let mut largest = 0u32;
        for (frame, body) in self.frames.iter().zip(&bodies) {
            let flag = if frame.keyframe { 1 } else { 0 };
            header.extend_from_slice(&(offset | flag).to_le_bytes());
            offset += body.len() as u32;
            largest = largest.max(body.len() as u32);
        }

        let mut out = header;
        for body in bodies {
            out.extend_from_slice(&body);
        }
        let file_size = (out.len() - 8) as u32;
        out[4..8].copy_from_slice(&file_size.to_le_bytes());
        out[12..16].copy_from_slice(&largest.to_le_bytes());
        out
    }

    pub fn write_temp(&self) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&self.build()).unwrap();
        file.flush().unwrap();
        file
    }
}

// ============================================================================
// Scripted Container
// ============================================================================

/// An input format that replays fixed streams and packets, for layouts Bink
/// cannot express.
#[derive(Clone)]
pub struct ScriptedFormat {
    pub streams: Vec<StreamInfo>,
    pub packets: Vec<Packet>,
}

impl InputFormat for ScriptedFormat {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&self, _path: &Path) -> Result<Box<dyn Demuxer>, DemuxError> {
        Ok(Box::new(ScriptedDemuxer {
            streams: self.streams.clone(),
            packets: self.packets.clone(),
            next: 0,
        }))
    }
}

struct ScriptedDemuxer {
    streams: Vec<StreamInfo>,
    packets: Vec<Packet>,
    next: usize,
}

impl Demuxer for ScriptedDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Packet, DemuxError> {
        let packet = self.packets.get(self.next).cloned().ok_or(DemuxError::EndOfStream)?;
        self.next += 1;
        Ok(packet)
    }

    fn seek_to_start(&mut self) -> Result<(), DemuxError> {
        self.next = 0;
        Ok(())
    }
}

pub fn packet(stream_index: usize, pts: i64) -> Packet {
    Packet {
        stream_index,
        pts,
        keyframe: true,
        data: Bytes::from_static(&[0u8; 8]),
    }
}

// ============================================================================
// Scripted Decoders
// ============================================================================

pub enum VideoScript {
    /// One picture per packet
    EveryPacket,
    /// Outcomes for successive packets, then one picture per packet
    Pattern(Vec<Result<(), DecodeError>>),
}

pub struct FakeVideoDecoder {
    output: VideoOutput,
    script: VecDeque<Result<(), DecodeError>>,
    pending: Option<i64>,
    resets: Option<Arc<AtomicUsize>>,
    /// Geometry of emitted pictures when it differs from `output`
    frame_size: Option<(usize, usize)>,
}

impl FakeVideoDecoder {
    pub fn new(params: &CodecParameters, script: VideoScript) -> Self {
        let script = match script {
            VideoScript::EveryPacket => VecDeque::new(),
            VideoScript::Pattern(outcomes) => outcomes.into(),
        };
        Self {
            output: VideoOutput {
                width: params.width,
                height: params.height,
                format: params.pixel_format.unwrap_or(PixelFormat::YUV420P),
            },
            script,
            pending: None,
            resets: None,
            frame_size: None,
        }
    }

    /// Emit pictures of a different size than the decoder reports.
    pub fn frame_size(mut self, width: usize, height: usize) -> Self {
        self.frame_size = Some((width, height));
        self
    }

    pub fn count_resets(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.resets = Some(counter);
        self
    }
}

impl VideoDecoder for FakeVideoDecoder {
    fn name(&self) -> &str {
        "fake-video"
    }

    fn output(&self) -> VideoOutput {
        self.output
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        self.pending = Some(packet.pts);
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut VideoFrame) -> Result<(), DecodeError> {
        let pts = self.pending.take().ok_or(DecodeError::Again)?;
        self.script.pop_front().unwrap_or(Ok(()))?;

        let (width, height) = self
            .frame_size
            .unwrap_or((self.output.width as usize, self.output.height as usize));
        frame.reshape(width, height, self.output.format);
        // Brightness tracks the frame number so consecutive pictures differ
        let luma = 16 + (pts as u8 % 8) * 28;
        frame.fill_yuv(luma, 128, 128);
        frame.pts = pts;
        frame.keyframe = pts == 0;
        Ok(())
    }

    fn reset(&mut self) {
        self.pending = None;
        if let Some(counter) = &self.resets {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct FakeAudioDecoder {
    output: AudioOutput,
    frames_per_packet: usize,
    samples_per_frame: usize,
    amplitude: f32,
    pending: usize,
    pts: i64,
    packets: usize,
    /// Format used once this many packets have been decoded
    switch: Option<(usize, SampleFormat)>,
}

impl FakeAudioDecoder {
    pub fn new(params: &CodecParameters) -> Self {
        Self {
            output: AudioOutput {
                sample_rate: params.sample_rate,
                channel_layout: params.channel_layout.unwrap_or(ChannelLayout::Mono),
                sample_format: SampleFormat::F32,
            },
            frames_per_packet: 1,
            samples_per_frame: 1024,
            amplitude: 0.25,
            pending: 0,
            pts: 0,
            packets: 0,
            switch: None,
        }
    }

    /// Emit `format` frames from the packet after the first `packets`.
    pub fn switch_format_after(mut self, packets: usize, format: SampleFormat) -> Self {
        self.switch = Some((packets, format));
        self
    }

    pub fn frames_per_packet(mut self, n: usize) -> Self {
        self.frames_per_packet = n;
        self
    }

    pub fn samples_per_frame(mut self, n: usize) -> Self {
        self.samples_per_frame = n;
        self
    }

    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Report (and emit) a different layout than the container declared.
    pub fn layout(mut self, layout: ChannelLayout) -> Self {
        self.output.channel_layout = layout;
        self
    }

    pub fn sample_format(mut self, format: SampleFormat) -> Self {
        self.output.sample_format = format;
        self
    }
}

impl AudioDecoder for FakeAudioDecoder {
    fn name(&self) -> &str {
        "fake-audio"
    }

    fn output(&self) -> AudioOutput {
        self.output
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        self.pending = self.frames_per_packet;
        self.pts = packet.pts;
        self.packets += 1;
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut AudioFrame) -> Result<(), DecodeError> {
        if self.pending == 0 {
            return Err(DecodeError::Again);
        }
        self.pending -= 1;

        let layout = self.output.channel_layout;
        let channels = layout.channels() as usize;
        let n = self.samples_per_frame;
        frame.fill_f32(&vec![self.amplitude; n * channels], layout, self.output.sample_rate);
        let format = match self.switch {
            Some((after, format)) if self.packets > after => format,
            _ => self.output.sample_format,
        };
        match format {
            SampleFormat::F32 => {}
            SampleFormat::F32Planar => {
                frame.format = SampleFormat::F32Planar;
                let plane: Vec<u8> = (0..n).flat_map(|_| self.amplitude.to_ne_bytes()).collect();
                frame.data = vec![plane; channels];
            }
            other => {
                frame.format = other;
                frame.data = vec![vec![0u8; n * channels * other.bytes_per_sample()]];
            }
        }
        frame.pts = self.pts;
        Ok(())
    }

    fn reset(&mut self) {
        self.pending = 0;
    }
}

// ============================================================================
// In-memory Device
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Upload {
    pub buffer: BufferId,
    pub format: BufferFormat,
    pub len: usize,
    pub sample_rate: u32,
}

#[derive(Debug, Default)]
struct FakeSource {
    /// (buffer, finished)
    queue: VecDeque<(BufferId, bool)>,
    playing: bool,
}

/// Mimics the OpenAL buffer-queue model. Tests decide when buffers finish.
#[derive(Debug, Default)]
pub struct FakeDevice {
    next_id: u32,
    sources: HashMap<SourceId, FakeSource>,
    buffers: HashMap<BufferId, Option<Upload>>,
    uploads: Vec<Upload>,
    muted: bool,
    fail_uploads: bool,
    buffer_limit: Option<usize>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn set_fail_uploads(&mut self, fail: bool) {
        self.fail_uploads = fail;
    }

    pub fn set_buffer_limit(&mut self, limit: usize) {
        self.buffer_limit = Some(limit);
    }

    /// Mark the oldest `n` unfinished buffers on `source` as played.
    pub fn finish_buffers(&mut self, source: SourceId, n: usize) {
        if let Some(src) = self.sources.get_mut(&source) {
            for entry in src.queue.iter_mut().filter(|(_, done)| !done).take(n) {
                entry.1 = true;
            }
        }
    }

    /// Finish every queued buffer on every source.
    pub fn finish_all(&mut self) {
        for src in self.sources.values_mut() {
            src.queue.iter_mut().for_each(|entry| entry.1 = true);
        }
    }

    pub fn queued(&self, source: SourceId) -> usize {
        self.sources.get(&source).map(|s| s.queue.len()).unwrap_or(0)
    }

    pub fn is_playing(&self, source: SourceId) -> bool {
        self.sources.get(&source).map(|s| s.playing).unwrap_or(false)
    }

    pub fn live_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.len()
    }

    pub fn last_upload(&self) -> Option<Upload> {
        self.uploads.last().copied()
    }

    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn source_mut(&mut self, source: SourceId) -> Result<&mut FakeSource, DeviceError> {
        self.sources.get_mut(&source).ok_or(DeviceError::UnknownSource(source))
    }

    fn is_attached(&self, buffer: BufferId) -> bool {
        self.sources.values().any(|s| s.queue.iter().any(|(b, _)| *b == buffer))
    }
}

impl AudioDevice for FakeDevice {
    fn create_source(&mut self, _params: SourceParams) -> Result<SourceId, DeviceError> {
        let id = SourceId(self.alloc_id());
        self.sources.insert(id, FakeSource::default());
        Ok(id)
    }

    fn delete_source(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.sources.remove(&source).map(|_| ()).ok_or(DeviceError::UnknownSource(source))
    }

    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        if let Some(limit) = self.buffer_limit {
            if self.buffers.len() + count > limit {
                return Err(DeviceError::OutOfResources);
            }
        }
        let ids: Vec<BufferId> = (0..count).map(|_| BufferId(self.alloc_id())).collect();
        for id in &ids {
            self.buffers.insert(*id, None);
        }
        Ok(ids)
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<(), DeviceError> {
        for id in buffers {
            if self.is_attached(*id) {
                return Err(DeviceError::BufferInUse(*id));
            }
        }
        for id in buffers {
            self.buffers.remove(id).ok_or(DeviceError::UnknownBuffer(*id))?;
        }
        Ok(())
    }

    fn buffer_data(
        &mut self,
        buffer: BufferId,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<(), DeviceError> {
        if self.fail_uploads {
            return Err(DeviceError::InvalidData("upload rejected".to_string()));
        }
        if self.is_attached(buffer) {
            return Err(DeviceError::BufferInUse(buffer));
        }
        if data.len() % format.frame_bytes() != 0 {
            return Err(DeviceError::InvalidData(format!("{} bytes for {:?}", data.len(), format)));
        }
        let upload = Upload { buffer, format, len: data.len(), sample_rate };
        let slot = self.buffers.get_mut(&buffer).ok_or(DeviceError::UnknownBuffer(buffer))?;
        *slot = Some(upload);
        self.uploads.push(upload);
        Ok(())
    }

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) -> Result<(), DeviceError> {
        for id in buffers {
            if !self.buffers.contains_key(id) {
                return Err(DeviceError::UnknownBuffer(*id));
            }
        }
        let src = self.source_mut(source)?;
        src.queue.extend(buffers.iter().map(|id| (*id, false)));
        Ok(())
    }

    fn unqueue_buffer(&mut self, source: SourceId) -> Result<Option<BufferId>, DeviceError> {
        let src = self.source_mut(source)?;
        match src.queue.front() {
            Some((id, true)) => {
                let id = *id;
                src.queue.pop_front();
                Ok(Some(id))
            }
            _ => Ok(None),
        }
    }

    fn buffers_processed(&self, source: SourceId) -> Result<usize, DeviceError> {
        let src = self.sources.get(&source).ok_or(DeviceError::UnknownSource(source))?;
        Ok(src.queue.iter().take_while(|(_, done)| *done).count())
    }

    fn buffers_queued(&self, source: SourceId) -> Result<usize, DeviceError> {
        let src = self.sources.get(&source).ok_or(DeviceError::UnknownSource(source))?;
        Ok(src.queue.len())
    }

    fn play(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.source_mut(source)?.playing = true;
        Ok(())
    }

    fn stop(&mut self, source: SourceId) -> Result<(), DeviceError> {
        self.source_mut(source)?.playing = false;
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.muted
    }
}
