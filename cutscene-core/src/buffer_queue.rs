//! # Audio Buffer Queue
//!
//! A fixed pool of device buffers split into a free list and an in-flight
//! list. Every audio frame runs a reclaim pass (finished buffers back to the
//! free list) followed by a submit pass (newest free buffer filled, queued and
//! moved in-flight). With no free buffer the frame's audio is dropped.
//!
//! ```text
//!            submit                 device plays
//!   ┌──────┐ ──────► ┌───────────┐ ─────────────► processed
//!   │ free │         │ in-flight │                    │
//!   └──────┘ ◄────── └───────────┘ ◄──────────────────┘
//!            reclaim               unqueue
//! ```

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::device::{log_device_error, AudioDevice, BufferFormat, BufferId, DeviceError, SourceId, SourceParams};

// ============================================================================
// Buffer Pool
// ============================================================================

/// Partition of a constant set of buffer handles into free and in-flight.
#[derive(Debug, Clone)]
pub struct BufferPool {
    free: Vec<BufferId>,
    in_flight: VecDeque<BufferId>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(buffers: Vec<BufferId>) -> Self {
        let capacity = buffers.len();
        Self {
            free: buffers,
            in_flight: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    /// The buffer the next submit will use: the most recently freed one.
    pub fn next_free(&self) -> Option<BufferId> {
        self.free.last().copied()
    }

    /// Move `id` from free to in-flight. False if it was not free.
    pub fn commit(&mut self, id: BufferId) -> bool {
        match self.free.iter().rposition(|b| *b == id) {
            Some(pos) => {
                self.free.remove(pos);
                self.in_flight.push_back(id);
                true
            }
            None => false,
        }
    }

    /// Move `id` from in-flight back to free. False if it was not in flight.
    pub fn reclaim(&mut self, id: BufferId) -> bool {
        match self.in_flight.iter().position(|b| *b == id) {
            Some(pos) => {
                self.in_flight.remove(pos);
                self.free.push(id);
                true
            }
            None => false,
        }
    }

    pub fn free(&self) -> &[BufferId] {
        &self.free
    }

    pub fn in_flight(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.in_flight.iter().copied()
    }

    /// Every handle in the pool, free ones first.
    pub fn all(&self) -> Vec<BufferId> {
        self.free.iter().copied().chain(self.in_flight.iter().copied()).collect()
    }

    /// Both lists together hold every handle exactly once.
    pub fn is_consistent(&self) -> bool {
        let mut all = self.all();
        let len = all.len();
        all.sort_unstable();
        all.dedup();
        len == self.capacity && all.len() == self.capacity
    }
}

// ============================================================================
// Audio Queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued(BufferId),
    /// No free buffer; the frame's audio was discarded
    Dropped,
    /// The device rejected the upload or queue call
    Failed,
}

/// One device source plus its buffer pool.
#[derive(Debug)]
pub struct AudioQueue {
    source: SourceId,
    pool: BufferPool,
    format: BufferFormat,
    sample_rate: u32,
    trim_bytes: usize,
}

impl AudioQueue {
    /// Create the source and `buffer_count` buffers. Nothing is left on the
    /// device if this fails.
    pub fn create<D: AudioDevice + ?Sized>(
        device: &mut D,
        buffer_count: usize,
        format: BufferFormat,
        sample_rate: u32,
        trim_bytes: usize,
    ) -> Result<Self, DeviceError> {
        let source = device.create_source(SourceParams::default())?;
        let buffers = match device.create_buffers(buffer_count) {
            Ok(buffers) => buffers,
            Err(e) => {
                log_device_error("delete_source", device.delete_source(source));
                return Err(e);
            }
        };
        debug!(
            "Audio queue ready: {:?} @ {} Hz, {} buffers",
            format,
            sample_rate,
            buffers.len()
        );
        Ok(Self {
            source,
            pool: BufferPool::new(buffers),
            format,
            sample_rate,
            trim_bytes,
        })
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn format(&self) -> BufferFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Return finished buffers to the free list. Returns how many came back.
    pub fn reclaim<D: AudioDevice + ?Sized>(&mut self, device: &mut D) -> usize {
        let processed = log_device_error("buffers_processed", device.buffers_processed(self.source)).unwrap_or(0);
        if processed == 0 {
            return 0;
        }

        log_device_error("stop", device.stop(self.source));
        let mut reclaimed = 0;
        for _ in 0..processed {
            match device.unqueue_buffer(self.source) {
                Ok(Some(id)) => {
                    if self.pool.reclaim(id) {
                        reclaimed += 1;
                    } else {
                        warn!("Device returned buffer {:?} that was not in flight", id);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Audio device unqueue failed: {}", e);
                    break;
                }
            }
        }
        self.resume_if_queued(device);

        trace!("reclaimed {} buffer(s), {} free", reclaimed, self.pool.free_count());
        reclaimed
    }

    /// Upload `pcm` into the newest free buffer and queue it.
    pub fn submit<D: AudioDevice + ?Sized>(&mut self, device: &mut D, pcm: &[u8]) -> SubmitOutcome {
        let Some(buffer) = self.pool.next_free() else {
            trace!("no free audio buffer, dropping {} bytes", pcm.len());
            return SubmitOutcome::Dropped;
        };

        log_device_error("stop", device.stop(self.source));

        let mut len = pcm.len().saturating_sub(self.trim_bytes);
        len -= len % self.format.frame_bytes();

        if let Err(e) = device.buffer_data(buffer, self.format, &pcm[..len], self.sample_rate) {
            warn!("Audio device buffer_data failed: {}", e);
            self.resume_if_queued(device);
            return SubmitOutcome::Failed;
        }
        if let Err(e) = device.queue_buffers(self.source, &[buffer]) {
            warn!("Audio device queue_buffers failed: {}", e);
            self.resume_if_queued(device);
            return SubmitOutcome::Failed;
        }
        log_device_error("play", device.play(self.source));

        self.pool.commit(buffer);
        SubmitOutcome::Queued(buffer)
    }

    /// Stop the source and delete every device object. Errors are logged.
    pub fn release<D: AudioDevice + ?Sized>(self, device: &mut D) {
        log_device_error("stop", device.stop(self.source));
        while let Ok(Some(id)) = device.unqueue_buffer(self.source) {
            trace!("unqueued {:?} on release", id);
        }
        log_device_error("delete_source", device.delete_source(self.source));
        log_device_error("delete_buffers", device.delete_buffers(&self.pool.all()));
    }

    fn resume_if_queued<D: AudioDevice + ?Sized>(&self, device: &mut D) {
        let queued = log_device_error("buffers_queued", device.buffers_queued(self.source)).unwrap_or(0);
        if queued > 0 {
            log_device_error("play", device.play(self.source));
        }
    }
}
