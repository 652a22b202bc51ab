// PIXEL CONVERT - YUV to RGB32 Conversion + Scaling
//
// Bink decodes to planar YUV 4:2:0. The display surface takes
// fixed-size 32-bit RGB. This module does both steps at once:
// every destination pixel bilinearly samples the source planes
// and runs the result through pre-computed YUV->RGB tables.
//
// The destination buffer is owned by the converter and reused
// for every frame, so the hot path does not allocate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    // YUV planar (decoder output)
    YUV420P,      // Y plane, U plane (quarter size), V plane (quarter size)
    YUVA420P,     // YUV420P + full-size alpha plane

    // YUV semi-planar
    NV12,         // Y plane, interleaved UV plane

    // RGB
    RGB24,        // 8-bit per channel, packed
    RGBA32,       // 8-bit per channel + alpha, packed
    RGB32,        // native-endian u32 0xAARRGGBB (display surfaces)
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, 0 for planar
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::RGB24 => 3,
            Self::RGBA32 | Self::RGB32 => 4,
            _ => 0,
        }
    }

    pub fn is_yuv(&self) -> bool {
        matches!(self, Self::YUV420P | Self::YUVA420P | Self::NV12)
    }

    pub fn is_rgb(&self) -> bool {
        matches!(self, Self::RGB24 | Self::RGBA32 | Self::RGB32)
    }

    /// (bytes per row, rows) of every plane for a `width` x `height` image.
    pub fn plane_layout(&self, width: usize, height: usize) -> Vec<(usize, usize)> {
        let cw = (width + 1) / 2;
        let ch = (height + 1) / 2;
        match self {
            Self::YUV420P => vec![(width, height), (cw, ch), (cw, ch)],
            Self::YUVA420P => vec![(width, height), (cw, ch), (cw, ch), (width, height)],
            Self::NV12 => vec![(width, height), (cw * 2, ch)],
            Self::RGB24 | Self::RGBA32 | Self::RGB32 => {
                vec![(width * self.bytes_per_pixel(), height)]
            }
        }
    }
}

// ============================================================================
// Color Spaces
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    BT601,    // SD
    BT709,    // HD
}

impl ColorSpace {
    /// Returns (Wr, Wb) where Wg = 1 - Wr - Wb
    pub fn coefficients(&self) -> (f32, f32) {
        match self {
            Self::BT601 => (0.299, 0.114),
            Self::BT709 => (0.2126, 0.0722),
        }
    }

    /// Full-range YUV to RGB matrix
    pub fn yuv_to_rgb_matrix(&self) -> [[f32; 3]; 3] {
        let (wr, wb) = self.coefficients();
        let wg = 1.0 - wr - wb;

        // R = Y + 2*(1-Wr)*Cr
        // G = Y - 2*Wb*(1-Wb)/Wg*Cb - 2*Wr*(1-Wr)/Wg*Cr
        // B = Y + 2*(1-Wb)*Cb
        let cr_r = 2.0 * (1.0 - wr);
        let cb_g = -2.0 * wb * (1.0 - wb) / wg;
        let cr_g = -2.0 * wr * (1.0 - wr) / wg;
        let cb_b = 2.0 * (1.0 - wb);

        [
            [1.0, 0.0, cr_r],
            [1.0, cb_g, cr_g],
            [1.0, cb_b, 0.0],
        ]
    }
}

// ============================================================================
// Video Frame
// ============================================================================

/// A decoded picture. Decoders write into a frame owned by the decode stage,
/// so its contents are only valid until the next decode call.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub planes: Vec<Vec<u8>>,
    pub linesize: Vec<usize>,  // Stride for each plane
    pub pts: i64,
    pub keyframe: bool,
}

impl VideoFrame {
    pub fn new(width: usize, height: usize, format: PixelFormat) -> Self {
        let layout = format.plane_layout(width, height);
        Self {
            width,
            height,
            format,
            planes: layout.iter().map(|&(row, rows)| vec![0u8; row * rows]).collect(),
            linesize: layout.iter().map(|&(row, _)| row).collect(),
            pts: 0,
            keyframe: false,
        }
    }

    /// Empty placeholder frame, resized by the first decode.
    pub fn empty() -> Self {
        Self::new(0, 0, PixelFormat::YUV420P)
    }

    /// Reallocate planes if the geometry changed (keeps allocations otherwise).
    pub fn reshape(&mut self, width: usize, height: usize, format: PixelFormat) {
        if self.width == width && self.height == height && self.format == format {
            return;
        }
        *self = Self::new(width, height, format);
    }

    pub fn plane(&self, index: usize) -> &[u8] {
        self.planes.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        self.planes.get_mut(index).map(Vec::as_mut_slice).unwrap_or(&mut [])
    }

    /// Fill a YUV frame with a single color (Y, U, V).
    pub fn fill_yuv(&mut self, y: u8, u: u8, v: u8) {
        match self.format {
            PixelFormat::YUV420P | PixelFormat::YUVA420P => {
                self.plane_mut(0).fill(y);
                self.plane_mut(1).fill(u);
                self.plane_mut(2).fill(v);
                if self.format == PixelFormat::YUVA420P {
                    self.plane_mut(3).fill(255);
                }
            }
            PixelFormat::NV12 => {
                self.plane_mut(0).fill(y);
                for pair in self.plane_mut(1).chunks_exact_mut(2) {
                    pair[0] = u;
                    pair[1] = v;
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Converter
// ============================================================================

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Unsupported conversion: {src:?} -> {dst:?}")]
    UnsupportedConversion { src: PixelFormat, dst: PixelFormat },
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    #[error("Frame mismatch: expected {expected_width}x{expected_height} {expected_format:?}, got {width}x{height} {format:?}")]
    FrameMismatch {
        expected_width: usize,
        expected_height: usize,
        expected_format: PixelFormat,
        width: usize,
        height: usize,
        format: PixelFormat,
    },
    #[error("Plane {0} is smaller than its stride and height require")]
    PlaneTooSmall(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleFilter {
    Nearest,
    Bilinear,
}

/// One axis of the resampling grid: two source indices and the weight of
/// the second, in 1/256ths.
#[derive(Debug, Clone, Copy)]
struct Tap {
    i0: usize,
    i1: usize,
    frac: u32,
}

fn build_taps(src_len: usize, dst_len: usize, filter: ScaleFilter) -> Vec<Tap> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len - 1;
    (0..dst_len)
        .map(|d| match filter {
            ScaleFilter::Nearest => {
                let i = (((d as f64 + 0.5) * scale) as usize).min(last);
                Tap { i0: i, i1: i, frac: 0 }
            }
            ScaleFilter::Bilinear => {
                let pos = ((d as f64 + 0.5) * scale - 0.5).clamp(0.0, last as f64);
                let i0 = pos as usize;
                let i1 = (i0 + 1).min(last);
                let frac = ((pos - i0 as f64) * 256.0).round() as u32;
                Tap { i0, i1, frac }
            }
        })
        .collect()
}

#[inline]
fn lerp(a: u32, b: u32, frac: u32) -> u32 {
    (a * (256 - frac) + b * frac + 128) >> 8
}

#[inline]
fn sample(plane: &[u8], stride: usize, step: usize, offset: usize, tx: Tap, ty: Tap) -> u32 {
    let row0 = ty.i0 * stride;
    let row1 = ty.i1 * stride;
    let x0 = tx.i0 * step + offset;
    let x1 = tx.i1 * step + offset;
    let top = lerp(plane[row0 + x0] as u32, plane[row0 + x1] as u32, tx.frac);
    let bottom = lerp(plane[row1 + x0] as u32, plane[row1 + x1] as u32, tx.frac);
    lerp(top, bottom, ty.frac)
}

#[inline]
fn pack_rgb32(r: i32, g: i32, b: i32) -> u32 {
    0xFF00_0000 | ((r.clamp(0, 255) as u32) << 16) | ((g.clamp(0, 255) as u32) << 8) | b.clamp(0, 255) as u32
}

/// Converts decoded frames of one fixed geometry into a fixed-size RGB32
/// image. Built once per session.
pub struct ColorConverter {
    src_width: usize,
    src_height: usize,
    src_format: PixelFormat,
    dst_width: usize,
    dst_height: usize,
    luma_x: Vec<Tap>,
    luma_y: Vec<Tap>,
    chroma_x: Vec<Tap>,
    chroma_y: Vec<Tap>,
    // Pre-computed lookup tables for speed
    y_table: [i32; 256],
    u_table_g: [i32; 256],
    u_table_b: [i32; 256],
    v_table_r: [i32; 256],
    v_table_g: [i32; 256],
    scratch: Vec<u32>,
}

impl ColorConverter {
    pub fn new(
        src_width: usize,
        src_height: usize,
        src_format: PixelFormat,
        dst_width: usize,
        dst_height: usize,
        dst_format: PixelFormat,
        filter: ScaleFilter,
    ) -> Result<Self, ConvertError> {
        if dst_format != PixelFormat::RGB32 || src_format == PixelFormat::RGB32 {
            return Err(ConvertError::UnsupportedConversion { src: src_format, dst: dst_format });
        }
        for (width, height) in [(src_width, src_height), (dst_width, dst_height)] {
            if width == 0 || height == 0 {
                return Err(ConvertError::InvalidDimensions { width, height });
            }
        }

        let chroma_w = (src_width + 1) / 2;
        let chroma_h = (src_height + 1) / 2;
        let mut converter = Self {
            src_width,
            src_height,
            src_format,
            dst_width,
            dst_height,
            luma_x: build_taps(src_width, dst_width, filter),
            luma_y: build_taps(src_height, dst_height, filter),
            chroma_x: build_taps(chroma_w, dst_width, filter),
            chroma_y: build_taps(chroma_h, dst_height, filter),
            y_table: [0; 256],
            u_table_g: [0; 256],
            u_table_b: [0; 256],
            v_table_r: [0; 256],
            v_table_g: [0; 256],
            scratch: vec![0u32; dst_width * dst_height],
        };
        converter.build_tables(ColorSpace::BT601);
        Ok(converter)
    }

    fn build_tables(&mut self, color_space: ColorSpace) {
        let matrix = color_space.yuv_to_rgb_matrix();
        // Studio-swing chroma (16-240) expands by 255/224
        let chroma_scale = 255.0 / 224.0;

        for i in 0..256 {
            let y = (i as i32) - 16;
            let uv = ((i as i32) - 128) as f32 * chroma_scale;

            // Scale Y from 16-235 to 0-255
            self.y_table[i] = (y * 298 + 128) >> 8;  // 298/256 ≈ 1.164

            self.u_table_g[i] = (uv * matrix[1][1]).round() as i32;
            self.u_table_b[i] = (uv * matrix[2][1]).round() as i32;
            self.v_table_r[i] = (uv * matrix[0][2]).round() as i32;
            self.v_table_g[i] = (uv * matrix[1][2]).round() as i32;
        }
    }

    pub fn target_size(&self) -> (usize, usize) {
        (self.dst_width, self.dst_height)
    }

    /// Last converted image as raw RGB32 bytes.
    pub fn output(&self) -> &[u8] {
        bytemuck::cast_slice(&self.scratch)
    }

    /// Convert `frame` into the converter's buffer and return it.
    pub fn convert(&mut self, frame: &VideoFrame) -> Result<&[u8], ConvertError> {
        if frame.width != self.src_width
            || frame.height != self.src_height
            || frame.format != self.src_format
        {
            return Err(ConvertError::FrameMismatch {
                expected_width: self.src_width,
                expected_height: self.src_height,
                expected_format: self.src_format,
                width: frame.width,
                height: frame.height,
                format: frame.format,
            });
        }
        self.check_planes(frame)?;

        match self.src_format {
            PixelFormat::YUV420P | PixelFormat::YUVA420P => self.planar_yuv_to_rgb32(frame),
            PixelFormat::NV12 => self.nv12_to_rgb32(frame),
            PixelFormat::RGB24 => self.packed_rgb_to_rgb32(frame, 3),
            PixelFormat::RGBA32 => self.packed_rgb_to_rgb32(frame, 4),
            PixelFormat::RGB32 => {
                return Err(ConvertError::UnsupportedConversion {
                    src: PixelFormat::RGB32,
                    dst: PixelFormat::RGB32,
                });
            }
        }

        Ok(self.output())
    }

    fn check_planes(&self, frame: &VideoFrame) -> Result<(), ConvertError> {
        let layout = self.src_format.plane_layout(self.src_width, self.src_height);
        for (index, &(row, rows)) in layout.iter().enumerate() {
            let stride = frame.linesize.get(index).copied().unwrap_or(0);
            if stride < row || frame.plane(index).len() < stride * (rows - 1) + row {
                return Err(ConvertError::PlaneTooSmall(index));
            }
        }
        Ok(())
    }

    #[inline]
    fn yuv_to_rgb32(&self, y: u32, u: u32, v: u32) -> u32 {
        let (y, u, v) = (y as usize, u as usize, v as usize);
        let y_contrib = self.y_table[y];
        let r = y_contrib + self.v_table_r[v];
        let g = y_contrib + self.u_table_g[u] + self.v_table_g[v];
        let b = y_contrib + self.u_table_b[u];
        pack_rgb32(r, g, b)
    }

    fn planar_yuv_to_rgb32(&mut self, src: &VideoFrame) {
        let (y_plane, u_plane, v_plane) = (src.plane(0), src.plane(1), src.plane(2));
        let (y_stride, u_stride, v_stride) = (src.linesize[0], src.linesize[1], src.linesize[2]);

        for dy in 0..self.dst_height {
            let (ly, cy) = (self.luma_y[dy], self.chroma_y[dy]);
            for dx in 0..self.dst_width {
                let (lx, cx) = (self.luma_x[dx], self.chroma_x[dx]);
                let y = sample(y_plane, y_stride, 1, 0, lx, ly);
                let u = sample(u_plane, u_stride, 1, 0, cx, cy);
                let v = sample(v_plane, v_stride, 1, 0, cx, cy);
                self.scratch[dy * self.dst_width + dx] = self.yuv_to_rgb32(y, u, v);
            }
        }
    }

    fn nv12_to_rgb32(&mut self, src: &VideoFrame) {
        let (y_plane, uv_plane) = (src.plane(0), src.plane(1));
        let (y_stride, uv_stride) = (src.linesize[0], src.linesize[1]);

        for dy in 0..self.dst_height {
            let (ly, cy) = (self.luma_y[dy], self.chroma_y[dy]);
            for dx in 0..self.dst_width {
                let (lx, cx) = (self.luma_x[dx], self.chroma_x[dx]);
                let y = sample(y_plane, y_stride, 1, 0, lx, ly);
                let u = sample(uv_plane, uv_stride, 2, 0, cx, cy);
                let v = sample(uv_plane, uv_stride, 2, 1, cx, cy);
                self.scratch[dy * self.dst_width + dx] = self.yuv_to_rgb32(y, u, v);
            }
        }
    }

    fn packed_rgb_to_rgb32(&mut self, src: &VideoFrame, step: usize) {
        let plane = src.plane(0);
        let stride = src.linesize[0];

        for dy in 0..self.dst_height {
            let ty = self.luma_y[dy];
            for dx in 0..self.dst_width {
                let tx = self.luma_x[dx];
                let r = sample(plane, stride, step, 0, tx, ty) as i32;
                let g = sample(plane, stride, step, 1, tx, ty) as i32;
                let b = sample(plane, stride, step, 2, tx, ty) as i32;
                self.scratch[dy * self.dst_width + dx] = pack_rgb32(r, g, b);
            }
        }
    }
}
