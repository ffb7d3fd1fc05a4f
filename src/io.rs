use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageError};
use std::fs;
use std::path::Path;

use crate::canvas::{BufferError, ChannelMode, ImageBuffer};
use crate::ops::compositing;

/// Matte used when JPEG export has to drop an alpha channel.
pub const DEFAULT_JPEG_MATTE: [u8; 3] = [255, 255, 255];

// ============================================================================
// ERRORS
// ============================================================================

/// Raised when input bytes cannot be turned into an [`ImageBuffer`].
#[derive(Debug)]
pub enum DecodeError {
    Empty,
    UnsupportedFormat,
    Corrupt(String),
    Io(std::io::Error),
    InvalidBuffer(BufferError),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "input is empty"),
            DecodeError::UnsupportedFormat => write!(f, "unsupported or unrecognised image format"),
            DecodeError::Corrupt(e) => write!(f, "corrupt image data: {}", e),
            DecodeError::Io(e) => write!(f, "I/O error: {}", e),
            DecodeError::InvalidBuffer(e) => write!(f, "decoded image is invalid: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        DecodeError::Io(e)
    }
}

impl From<BufferError> for DecodeError {
    fn from(e: BufferError) -> Self {
        DecodeError::InvalidBuffer(e)
    }
}

impl From<ImageError> for DecodeError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Unsupported(_) => DecodeError::UnsupportedFormat,
            ImageError::IoError(io) => DecodeError::Io(io),
            other => DecodeError::Corrupt(other.to_string()),
        }
    }
}

/// Raised when a buffer cannot be written in the requested format.
#[derive(Debug)]
pub enum EncodeError {
    NoImage,
    UnsupportedFormat(String),
    Encoder(String),
    Io(std::io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::NoImage => write!(f, "no image to export"),
            EncodeError::UnsupportedFormat(name) => write!(f, "unsupported export format: {}", name),
            EncodeError::Encoder(e) => write!(f, "encoder error: {}", e),
            EncodeError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for EncodeError {}

impl From<std::io::Error> for EncodeError {
    fn from(e: std::io::Error) -> Self {
        EncodeError::Io(e)
    }
}

impl From<ImageError> for EncodeError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::IoError(io) => EncodeError::Io(io),
            other => EncodeError::Encoder(other.to_string()),
        }
    }
}

// ============================================================================
// FORMATS
// ============================================================================

/// Raster formats the editor can write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Jpeg { quality: u8 },
    Bmp,
}

impl ExportFormat {
    /// Resolve a format name or extension (`png`, `jpg`, `jpeg`, `bmp`).
    /// JPEG gets the default quality of 90.
    pub fn from_name(name: &str) -> Result<Self, EncodeError> {
        match name.trim().trim_start_matches('.').to_lowercase().as_str() {
            "png" => Ok(ExportFormat::Png),
            "jpg" | "jpeg" => Ok(ExportFormat::Jpeg { quality: 90 }),
            "bmp" => Ok(ExportFormat::Bmp),
            other => Err(EncodeError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Infer from a path's extension.
    pub fn from_path(path: &Path) -> Result<Self, EncodeError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| EncodeError::UnsupportedFormat(path.display().to_string()))?;
        Self::from_name(ext)
    }

    pub fn with_quality(self, quality: u8) -> Self {
        match self {
            ExportFormat::Jpeg { .. } => ExportFormat::Jpeg { quality: quality.clamp(1, 100) },
            other => other,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg { .. } => "jpg",
            ExportFormat::Bmp => "bmp",
        }
    }

    pub fn supports_alpha(&self) -> bool {
        !matches!(self, ExportFormat::Jpeg { .. })
    }
}

// ============================================================================
// DECODE / ENCODE
// ============================================================================

/// Decode PNG / JPEG / BMP (or anything else the `image` build supports).
pub fn decode(bytes: &[u8]) -> Result<ImageBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let format = image::guess_format(bytes).map_err(|_| DecodeError::UnsupportedFormat)?;
    let img = image::load_from_memory_with_format(bytes, format)?;
    Ok(ImageBuffer::from_dynamic(img)?)
}

/// Encode with the default white matte for alpha flattening.
pub fn encode(buffer: &ImageBuffer, format: ExportFormat) -> Result<Vec<u8>, EncodeError> {
    encode_with_matte(buffer, format, DEFAULT_JPEG_MATTE)
}

/// Encode `buffer` as `format`.
///
/// JPEG has no alpha channel: an RGBA buffer is composited over the opaque
/// `matte` colour before writing.  PNG and BMP keep the buffer's mode.
pub fn encode_with_matte(
    buffer: &ImageBuffer,
    format: ExportFormat,
    matte: [u8; 3],
) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    let (w, h) = buffer.dimensions();
    let color = match buffer.mode() {
        ChannelMode::Rgb => ColorType::Rgb8,
        ChannelMode::Rgba => ColorType::Rgba8,
    };

    match format {
        ExportFormat::Png => {
            PngEncoder::new(&mut out).write_image(buffer.as_raw(), w, h, color)?;
        }
        ExportFormat::Jpeg { quality } => {
            let rgb = compositing::flatten(buffer, matte);
            let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            encoder.encode(rgb.as_raw(), w, h, ColorType::Rgb8)?;
        }
        ExportFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut out);
            encoder.encode(buffer.as_raw(), w, h, color)?;
        }
    }
    Ok(out)
}

/// Read and decode a file from disk.
pub fn load_file(path: &Path) -> Result<ImageBuffer, DecodeError> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

/// Encode and write a buffer to disk.
pub fn write_file(
    buffer: &ImageBuffer,
    path: &Path,
    format: ExportFormat,
    matte: [u8; 3],
) -> Result<(), EncodeError> {
    let bytes = encode_with_matte(buffer, format, matte)?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Suggested file name for a save dialog: `edited_YYYYMMDD_HHMMSS.png`.
pub fn default_export_name() -> String {
    format!("edited_{}.png", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_rgba() -> ImageBuffer {
        ImageBuffer::new(
            2,
            2,
            ChannelMode::Rgba,
            vec![
                255, 0, 0, 255, 0, 255, 0, 128, //
                0, 0, 255, 0, 10, 20, 30, 40,
            ],
        )
        .unwrap()
    }

    #[test]
    fn decode_rejects_empty_and_garbage() {
        assert!(matches!(decode(&[]), Err(DecodeError::Empty)));
        assert!(matches!(
            decode(b"definitely not an image"),
            Err(DecodeError::UnsupportedFormat)
        ));
    }

    #[test]
    fn decode_reports_truncated_png_as_error() {
        let bytes = encode(&checker_rgba(), ExportFormat::Png).unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(decode(truncated).is_err());
    }

    #[test]
    fn png_keeps_alpha_losslessly() {
        let img = checker_rgba();
        let bytes = encode(&img, ExportFormat::Png).unwrap();
        assert_eq!(decode(&bytes).unwrap(), img);
    }

    #[test]
    fn jpeg_flattens_alpha_onto_matte() {
        let img = ImageBuffer::filled(8, 8, ChannelMode::Rgba, &[0, 0, 0, 0]).unwrap();
        let bytes = encode(&img, ExportFormat::Jpeg { quality: 95 }).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back.mode(), ChannelMode::Rgb);
        // Fully transparent black over a white matte comes back white (within JPEG loss).
        assert!(back.as_raw().iter().all(|&s| s >= 250));
    }

    #[test]
    fn bmp_round_trips_rgb() {
        let img = ImageBuffer::new(3, 1, ChannelMode::Rgb, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        let bytes = encode(&img, ExportFormat::Bmp).unwrap();
        assert_eq!(decode(&bytes).unwrap(), img);
    }

    #[test]
    fn format_resolution() {
        assert_eq!(ExportFormat::from_name("JPG").unwrap(), ExportFormat::Jpeg { quality: 90 });
        assert_eq!(ExportFormat::from_path(Path::new("a/b.png")).unwrap(), ExportFormat::Png);
        assert!(matches!(
            ExportFormat::from_name("tga"),
            Err(EncodeError::UnsupportedFormat(_))
        ));
        assert_eq!(
            ExportFormat::Jpeg { quality: 90 }.with_quality(0),
            ExportFormat::Jpeg { quality: 1 }
        );
    }

    #[test]
    fn default_name_shape() {
        let name = default_export_name();
        assert!(name.starts_with("edited_") && name.ends_with(".png"));
        assert_eq!(name.len(), "edited_20240101_120000.png".len());
    }
}
