//! # Cutscene Core
//!
//! Tick-driven Bink cutscene playback: demux, decode, convert video into a
//! fixed RGB32 surface and feed decoded audio through a small pool of
//! device buffers.

// ============================================================================
// Container
// ============================================================================
pub mod media;
pub mod demux;
pub mod bink;
pub mod probe;
pub mod registry;

// ============================================================================
// Decode / Convert
// ============================================================================
pub mod decode;
pub mod pixel_convert;
pub mod resample;

// ============================================================================
// Output
// ============================================================================
pub mod surface;
pub mod device;
pub mod buffer_queue;
#[cfg(feature = "audio")]
pub mod cpal_device;

// ============================================================================
// Playback
// ============================================================================
pub mod config;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use config::PlaybackConfig;
pub use registry::CodecRegistry;
pub use session::{PlaybackStats, Session, SessionError, Tick};
pub use surface::{DisplaySurface, MemorySurface};
pub use device::AudioDevice;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
