//! # Display Surface
//!
//! The streaming texture a session writes converted frames into. Hosts
//! implement [`DisplaySurface`] over their renderer; [`MemorySurface`] is an
//! in-memory implementation for headless use.
//!
//! Writes always go through [`WriteLock`], which unlocks on drop.

use thiserror::Error;

use crate::pixel_convert::PixelFormat;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Surface not allocated")]
    NotAllocated,
    #[error("Surface already locked")]
    AlreadyLocked,
    #[error("Surface allocation failed: {0}")]
    AllocationFailed(String),
    #[error("Lock failed: {0}")]
    LockFailed(String),
}

/// On-screen placement of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

pub trait DisplaySurface {
    /// (Re)create the backing texture for streaming writes.
    fn allocate_streaming(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<(), SurfaceError>;

    fn lock_for_write(&mut self) -> Result<(), SurfaceError>;

    /// Writable pixels and the row pitch in bytes, while locked.
    fn locked_data(&mut self) -> Option<(&mut [u8], usize)>;

    fn unlock_write(&mut self);

    fn bounds(&self) -> Bounds;
}

// ============================================================================
// Write Lock
// ============================================================================

/// Scoped write access. The surface is unlocked when the guard drops.
pub struct WriteLock<'a, S: DisplaySurface + ?Sized> {
    surface: &'a mut S,
}

impl<'a, S: DisplaySurface + ?Sized> WriteLock<'a, S> {
    pub fn acquire(surface: &'a mut S) -> Result<Self, SurfaceError> {
        surface.lock_for_write()?;
        Ok(Self { surface })
    }

    /// Copy packed rows of `row_bytes` each into the surface, honoring its
    /// pitch. Returns the number of rows written.
    pub fn copy_rows(&mut self, pixels: &[u8], row_bytes: usize) -> usize {
        let Some((dst, pitch)) = self.surface.locked_data() else {
            return 0;
        };
        if row_bytes == 0 {
            return 0;
        }
        let width = row_bytes.min(pitch);
        let mut rows = 0;
        for (src_row, dst_row) in pixels.chunks_exact(row_bytes).zip(dst.chunks_mut(pitch)) {
            let n = width.min(dst_row.len());
            dst_row[..n].copy_from_slice(&src_row[..n]);
            rows += 1;
        }
        rows
    }
}

impl<S: DisplaySurface + ?Sized> Drop for WriteLock<'_, S> {
    fn drop(&mut self) {
        self.surface.unlock_write();
    }
}

// ============================================================================
// Memory Surface
// ============================================================================

/// A heap-backed streaming surface.
#[derive(Debug, Clone)]
pub struct MemorySurface {
    bounds: Bounds,
    format: Option<PixelFormat>,
    pitch: usize,
    pixels: Vec<u8>,
    locked: bool,
    max_size: (u32, u32),
    lock_count: u64,
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::with_max_size(8192, 8192)
    }

    /// Surface that refuses allocations larger than `width`x`height`, like a
    /// renderer with a texture size limit.
    pub fn with_max_size(width: u32, height: u32) -> Self {
        Self {
            bounds: Bounds::default(),
            format: None,
            pitch: 0,
            pixels: Vec::new(),
            locked: false,
            max_size: (width, height),
            lock_count: 0,
        }
    }

    pub fn set_position(&mut self, x: i32, y: i32) {
        self.bounds.x = x;
        self.bounds.y = y;
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Packed RGB32 value at (x, y), if allocated as RGB32.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if self.format != Some(PixelFormat::RGB32) || x >= self.bounds.width || y >= self.bounds.height {
            return None;
        }
        let offset = y as usize * self.pitch + x as usize * 4;
        let bytes = self.pixels.get(offset..offset + 4)?;
        Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Number of successful locks since creation.
    pub fn lock_count(&self) -> u64 {
        self.lock_count
    }
}

impl DisplaySurface for MemorySurface {
    fn allocate_streaming(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<(), SurfaceError> {
        if self.locked {
            return Err(SurfaceError::AlreadyLocked);
        }
        if width == 0 || height == 0 || width > self.max_size.0 || height > self.max_size.1 {
            return Err(SurfaceError::AllocationFailed(format!(
                "{}x{} exceeds {}x{}",
                width, height, self.max_size.0, self.max_size.1
            )));
        }
        self.pitch = width as usize * format.bytes_per_pixel();
        self.pixels = vec![0u8; self.pitch * height as usize];
        self.format = Some(format);
        self.bounds.width = width;
        self.bounds.height = height;
        Ok(())
    }

    fn lock_for_write(&mut self) -> Result<(), SurfaceError> {
        if self.format.is_none() {
            return Err(SurfaceError::NotAllocated);
        }
        if self.locked {
            return Err(SurfaceError::AlreadyLocked);
        }
        self.locked = true;
        self.lock_count += 1;
        Ok(())
    }

    fn locked_data(&mut self) -> Option<(&mut [u8], usize)> {
        if self.locked {
            Some((&mut self.pixels, self.pitch))
        } else {
            None
        }
    }

    fn unlock_write(&mut self) {
        self.locked = false;
    }

    fn bounds(&self) -> Bounds {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_bounds() {
        let mut surface = MemorySurface::new();
        surface.allocate_streaming(800, 600, PixelFormat::RGB32).unwrap();
        surface.set_position(10, 20);
        assert_eq!(surface.bounds(), Bounds { x: 10, y: 20, width: 800, height: 600 });
        assert_eq!(surface.pitch(), 3200);
        assert_eq!(surface.pixels().len(), 3200 * 600);
    }

    #[test]
    fn test_allocation_limit() {
        let mut surface = MemorySurface::with_max_size(640, 480);
        assert!(matches!(
            surface.allocate_streaming(800, 600, PixelFormat::RGB32),
            Err(SurfaceError::AllocationFailed(_))
        ));
        assert!(surface.format().is_none());
    }

    #[test]
    fn test_lock_requires_allocation() {
        let mut surface = MemorySurface::new();
        assert!(matches!(
            WriteLock::acquire(&mut surface),
            Err(SurfaceError::NotAllocated)
        ));
        assert_eq!(surface.lock_count(), 0);
    }

    #[test]
    fn test_guard_unlocks_on_drop() {
        let mut surface = MemorySurface::new();
        surface.allocate_streaming(2, 2, PixelFormat::RGB32).unwrap();
        {
            let mut lock = WriteLock::acquire(&mut surface).unwrap();
            let pixels: Vec<u8> = [0xFF00_00FFu32; 4].iter().flat_map(|p| p.to_ne_bytes()).collect();
            assert_eq!(lock.copy_rows(&pixels, 8), 2);
        }
        assert!(!surface.is_locked());
        assert_eq!(surface.lock_count(), 1);
        assert_eq!(surface.pixel(1, 1), Some(0xFF00_00FF));
        assert_eq!(surface.pixel(2, 0), None);
    }

    #[test]
    fn test_double_lock_rejected() {
        let mut surface = MemorySurface::new();
        surface.allocate_streaming(2, 2, PixelFormat::RGB32).unwrap();
        surface.lock_for_write().unwrap();
        assert!(matches!(surface.lock_for_write(), Err(SurfaceError::AlreadyLocked)));
        surface.unlock_write();
        assert!(surface.lock_for_write().is_ok());
    }
}
