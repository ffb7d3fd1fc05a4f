use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};
use rayon::prelude::*;

// ============================================================================
// CHANNEL MODE
// ============================================================================

/// Pixel layout of an [`ImageBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelMode {
    Rgb,
    Rgba,
}

impl ChannelMode {
    /// Samples per pixel.
    pub fn channels(self) -> usize {
        match self {
            ChannelMode::Rgb => 3,
            ChannelMode::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        self == ChannelMode::Rgba
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelMode::Rgb => "RGB",
            ChannelMode::Rgba => "RGBA",
        }
    }
}

impl std::fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resampling filter used when scaling a buffer for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResamplingPolicy {
    Nearest,
    Linear,
    #[default]
    Lanczos3,
}

impl ResamplingPolicy {
    fn filter(self) -> FilterType {
        match self {
            ResamplingPolicy::Nearest => FilterType::Nearest,
            ResamplingPolicy::Linear => FilterType::Triangle,
            ResamplingPolicy::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Raised when raw pixel data does not describe a valid buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    InvalidDimensions { width: u32, height: u32 },
    LengthMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::InvalidDimensions { width, height } => {
                write!(f, "invalid image dimensions {}x{}", width, height)
            }
            BufferError::LengthMismatch { expected, actual } => write!(
                f,
                "pixel data has {} bytes, expected {}",
                actual, expected
            ),
        }
    }
}

impl std::error::Error for BufferError {}

// ============================================================================
// IMAGE BUFFER
// ============================================================================

/// Decoded raster image: row-major 8-bit samples, 3 or 4 per pixel.
///
/// Pixels live behind an `Arc`, so a clone is a cheap handle to the same
/// immutable data.  Every operation that changes pixels returns a new buffer.
#[derive(Clone, Debug)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    mode: ChannelMode,
    data: Arc<[u8]>,
}

impl PartialEq for ImageBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.mode == other.mode
            && (Arc::ptr_eq(&self.data, &other.data) || self.data == other.data)
    }
}

impl Eq for ImageBuffer {}

impl ImageBuffer {
    pub fn new(width: u32, height: u32, mode: ChannelMode, data: Vec<u8>) -> Result<Self, BufferError> {
        if width == 0 || height == 0 {
            return Err(BufferError::InvalidDimensions { width, height });
        }
        let expected = width as usize * height as usize * mode.channels();
        if data.len() != expected {
            return Err(BufferError::LengthMismatch { expected, actual: data.len() });
        }
        Ok(Self {
            width,
            height,
            mode,
            data: data.into(),
        })
    }

    /// A buffer with every pixel set to `pixel` (must have `mode.channels()` samples).
    pub fn filled(width: u32, height: u32, mode: ChannelMode, pixel: &[u8]) -> Result<Self, BufferError> {
        let ch = mode.channels();
        if pixel.len() != ch {
            return Err(BufferError::LengthMismatch { expected: ch, actual: pixel.len() });
        }
        let count = width as usize * height as usize;
        let mut data = Vec::with_capacity(count * ch);
        for _ in 0..count {
            data.extend_from_slice(pixel);
        }
        Self::new(width, height, mode, data)
    }

    pub fn from_rgb_image(img: RgbImage) -> Result<Self, BufferError> {
        let (w, h) = img.dimensions();
        Self::new(w, h, ChannelMode::Rgb, img.into_raw())
    }

    pub fn from_rgba_image(img: RgbaImage) -> Result<Self, BufferError> {
        let (w, h) = img.dimensions();
        Self::new(w, h, ChannelMode::Rgba, img.into_raw())
    }

    /// Normalise any decoded colour type: sources with alpha become RGBA8,
    /// everything else (grey, 16-bit, palette) becomes RGB8.
    pub fn from_dynamic(img: DynamicImage) -> Result<Self, BufferError> {
        if img.color().has_alpha() {
            Self::from_rgba_image(img.into_rgba8())
        } else {
            Self::from_rgb_image(img.into_rgb8())
        }
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        let (w, h) = (self.width, self.height);
        match self.mode {
            ChannelMode::Rgb => DynamicImage::ImageRgb8(
                RgbImage::from_raw(w, h, self.data.to_vec()).unwrap_or_else(|| RgbImage::new(w, h)),
            ),
            ChannelMode::Rgba => DynamicImage::ImageRgba8(
                RgbaImage::from_raw(w, h, self.data.to_vec()).unwrap_or_else(|| RgbaImage::new(w, h)),
            ),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn channels(&self) -> usize {
        self.mode.channels()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Samples of the pixel at (x, y).  Panics when out of bounds, like
    /// `image::ImageBuffer::get_pixel`.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        assert!(x < self.width && y < self.height, "pixel ({}, {}) out of bounds", x, y);
        let ch = self.channels();
        let i = (y as usize * self.width as usize + x as usize) * ch;
        &self.data[i..i + ch]
    }

    /// True when both handles point at the same pixel allocation.
    pub fn shares_pixels(&self, other: &ImageBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Bytes of pixel data held by this buffer.
    pub fn memory_size(&self) -> usize {
        self.data.len()
    }

    /// Convert between channel modes.  RGB → RGBA fills alpha with 255;
    /// RGBA → RGB drops alpha.  Same mode returns a shared handle.
    pub fn to_mode(&self, mode: ChannelMode) -> ImageBuffer {
        if mode == self.mode {
            return self.clone();
        }
        let src_ch = self.channels();
        let dst_ch = mode.channels();
        let mut out = Vec::with_capacity(self.pixel_count() * dst_ch);
        for px in self.data.chunks_exact(src_ch) {
            out.extend_from_slice(&px[..3]);
            if dst_ch == 4 {
                out.push(255);
            }
        }
        Self {
            width: self.width,
            height: self.height,
            mode,
            data: out.into(),
        }
    }

    /// Scale to `width`×`height` (each at least 1) for display.
    pub fn resize(&self, width: u32, height: u32, policy: ResamplingPolicy) -> ImageBuffer {
        let width = width.max(1);
        let height = height.max(1);
        if width == self.width && height == self.height {
            return self.clone();
        }
        let filter = policy.filter();
        let (mode, raw) = match self.to_dynamic() {
            DynamicImage::ImageRgba8(img) => {
                (ChannelMode::Rgba, imageops::resize(&img, width, height, filter).into_raw())
            }
            other => (
                ChannelMode::Rgb,
                imageops::resize(&other.into_rgb8(), width, height, filter).into_raw(),
            ),
        };
        Self {
            width,
            height,
            mode,
            data: raw.into(),
        }
    }

    /// Build a new buffer of the same shape by mapping every pixel.
    /// `transform` receives the source samples and writes the output samples
    /// (both `channels()` long).  Rows are processed in parallel.
    pub fn map_pixels<F>(&self, transform: F) -> ImageBuffer
    where
        F: Fn(&[u8], &mut [u8]) + Sync,
    {
        let ch = self.channels();
        let stride = self.width as usize * ch;
        let src = &self.data;
        let mut dst = vec![0u8; src.len()];
        dst.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
            let row_in = &src[y * stride..(y + 1) * stride];
            for (px_in, px_out) in row_in.chunks_exact(ch).zip(row_out.chunks_exact_mut(ch)) {
                transform(px_in, px_out);
            }
        });
        Self {
            width: self.width,
            height: self.height,
            mode: self.mode,
            data: dst.into(),
        }
    }

    /// Same shape, new samples.  Caller guarantees the length.
    pub(crate) fn with_data(&self, mode: ChannelMode, data: Vec<u8>) -> Result<ImageBuffer, BufferError> {
        Self::new(self.width, self.height, mode, data)
    }
}
