// ============================================================================
// COMPOSITING: mask application and alpha-over blending
// ============================================================================

use rayon::prelude::*;

use crate::canvas::{ChannelMode, ImageBuffer, ResamplingPolicy};
use crate::ops::segmentation::SegmentationMask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositingError {
    NoImage,
    /// Blending needs an alpha channel; the buffer has this mode instead.
    NotRgba(ChannelMode),
    DimensionMismatch {
        image: (u32, u32),
        mask: (u32, u32),
    },
}

impl std::fmt::Display for CompositingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositingError::NoImage => write!(f, "no image loaded"),
            CompositingError::NotRgba(mode) => {
                write!(f, "image has no transparency (mode {}); remove the background first", mode)
            }
            CompositingError::DimensionMismatch { image, mask } => write!(
                f,
                "mask is {}x{} but image is {}x{}",
                mask.0, mask.1, image.0, image.1
            ),
        }
    }
}

impl std::error::Error for CompositingError {}

/// What to put behind a buffer with transparency.
#[derive(Clone, Debug, PartialEq)]
pub enum Background {
    Solid([u8; 3]),
    /// Stretched to the foreground's size.
    Image(ImageBuffer),
}

impl Background {
    pub fn description(&self) -> String {
        match self {
            Background::Solid([r, g, b]) => format!("Background Color ({}, {}, {})", r, g, b),
            Background::Image(img) => format!("Background Image ({}x{})", img.width(), img.height()),
        }
    }
}

// ============================================================================
// MASK
// ============================================================================

/// Cut out the foreground: alpha = mask × 255, RGB kept where the mask is 1
/// and zeroed where it is 0.  Always returns RGBA.
pub fn apply_mask(src: &ImageBuffer, mask: &SegmentationMask) -> Result<ImageBuffer, CompositingError> {
    if src.dimensions() != mask.dimensions() {
        return Err(CompositingError::DimensionMismatch {
            image: src.dimensions(),
            mask: mask.dimensions(),
        });
    }
    let ch = src.channels();
    let w = src.width() as usize;
    let mut out = vec![0u8; src.pixel_count() * 4];
    out.par_chunks_mut(w * 4).enumerate().for_each(|(y, row_out)| {
        let row_in = &src.as_raw()[y * w * ch..(y + 1) * w * ch];
        let row_mask = &mask.as_raw()[y * w..(y + 1) * w];
        for x in 0..w {
            if row_mask[x] == 1 {
                row_out[x * 4..x * 4 + 3].copy_from_slice(&row_in[x * ch..x * ch + 3]);
                row_out[x * 4 + 3] = 255;
            }
        }
    });
    src.with_data(ChannelMode::Rgba, out)
        .map_err(|_| CompositingError::DimensionMismatch {
            image: src.dimensions(),
            mask: mask.dimensions(),
        })
}

// ============================================================================
// ALPHA-OVER
// ============================================================================

#[inline]
fn over(fg: u8, bg: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8
}

/// Blend an RGBA buffer over `bg_at(pixel_index)`, writing `out_mode` pixels
/// with opaque alpha.
fn blend<F>(fg: &ImageBuffer, out_mode: ChannelMode, bg_at: F) -> ImageBuffer
where
    F: Fn(usize) -> [u8; 3] + Sync,
{
    let w = fg.width() as usize;
    let out_ch = out_mode.channels();
    let mut out = vec![0u8; fg.pixel_count() * out_ch];
    out.par_chunks_mut(w * out_ch).enumerate().for_each(|(y, row_out)| {
        let row_in = &fg.as_raw()[y * w * 4..(y + 1) * w * 4];
        for x in 0..w {
            let px = &row_in[x * 4..x * 4 + 4];
            let bg = bg_at(y * w + x);
            let o = &mut row_out[x * out_ch..x * out_ch + out_ch];
            for c in 0..3 {
                o[c] = over(px[c], bg[c], px[3]);
            }
            if out_ch == 4 {
                o[3] = 255;
            }
        }
    });
    fg.with_data(out_mode, out).unwrap_or_else(|_| fg.to_mode(out_mode))
}

/// `out = fg·α + colour·(1−α)`, result fully opaque.  Requires RGBA.
pub fn composite_over_solid(src: &ImageBuffer, color: [u8; 3]) -> Result<ImageBuffer, CompositingError> {
    if src.mode() != ChannelMode::Rgba {
        return Err(CompositingError::NotRgba(src.mode()));
    }
    Ok(blend(src, ChannelMode::Rgba, |_| color))
}

/// Alpha-over onto a solid colour or a picture.  Requires RGBA.
pub fn composite_over_background(
    src: &ImageBuffer,
    background: &Background,
) -> Result<ImageBuffer, CompositingError> {
    match background {
        Background::Solid(color) => composite_over_solid(src, *color),
        Background::Image(img) => {
            if src.mode() != ChannelMode::Rgba {
                return Err(CompositingError::NotRgba(src.mode()));
            }
            let (w, h) = src.dimensions();
            let bg = img
                .resize(w, h, ResamplingPolicy::Lanczos3)
                .to_mode(ChannelMode::Rgb);
            let raw = bg.as_raw();
            Ok(blend(src, ChannelMode::Rgba, |i| [raw[i * 3], raw[i * 3 + 1], raw[i * 3 + 2]]))
        }
    }
}

/// Drop alpha by compositing over an opaque `matte`.  RGB input is returned
/// as-is.
pub fn flatten(src: &ImageBuffer, matte: [u8; 3]) -> ImageBuffer {
    match src.mode() {
        ChannelMode::Rgb => src.clone(),
        ChannelMode::Rgba => blend(src, ChannelMode::Rgb, |_| matte),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(pixels: &[[u8; 4]], w: u32) -> ImageBuffer {
        let h = pixels.len() as u32 / w;
        ImageBuffer::new(w, h, ChannelMode::Rgba, pixels.concat()).unwrap()
    }

    #[test]
    fn mask_drives_alpha_and_clears_background_rgb() {
        let src = ImageBuffer::new(2, 1, ChannelMode::Rgb, vec![10, 20, 30, 40, 50, 60]).unwrap();
        let mask = SegmentationMask::new(2, 1, vec![1, 0]).unwrap();
        let out = apply_mask(&src, &mask).unwrap();
        assert_eq!(out.mode(), ChannelMode::Rgba);
        assert_eq!(out.as_raw(), &[10, 20, 30, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn mask_size_must_match() {
        let src = ImageBuffer::filled(3, 3, ChannelMode::Rgb, &[0, 0, 0]).unwrap();
        let mask = SegmentationMask::new(2, 2, vec![1; 4]).unwrap();
        assert_eq!(
            apply_mask(&src, &mask),
            Err(CompositingError::DimensionMismatch { image: (3, 3), mask: (2, 2) })
        );
    }

    #[test]
    fn opaque_foreground_ignores_background_colour() {
        let src = rgba(&[[1, 2, 3, 255], [200, 100, 50, 255]], 2);
        for color in [[0, 0, 0], [255, 255, 255], [0, 0, 255]] {
            let out = composite_over_solid(&src, color).unwrap();
            assert_eq!(out.as_raw(), src.as_raw());
        }
    }

    #[test]
    fn transparent_pixels_take_background_and_become_opaque() {
        let src = rgba(&[[0, 0, 0, 0], [255, 255, 255, 128]], 2);
        let out = composite_over_solid(&src, [0, 0, 255]).unwrap();
        assert_eq!(out.pixel(0, 0), &[0, 0, 255, 255]);
        // (255*128 + 0*127 + 127) / 255 = 128; (255*128 + 255*127 + 127) / 255 = 255
        assert_eq!(out.pixel(1, 0), &[128, 128, 255, 255]);
    }

    #[test]
    fn rgb_input_is_a_precondition_error() {
        let src = ImageBuffer::filled(2, 2, ChannelMode::Rgb, &[9, 9, 9]).unwrap();
        assert_eq!(
            composite_over_solid(&src, [0, 0, 0]),
            Err(CompositingError::NotRgba(ChannelMode::Rgb))
        );
        assert!(matches!(
            composite_over_background(&src, &Background::Image(src.clone())),
            Err(CompositingError::NotRgba(_))
        ));
    }

    #[test]
    fn image_background_is_stretched() {
        let fg = ImageBuffer::filled(4, 4, ChannelMode::Rgba, &[0, 0, 0, 0]).unwrap();
        let bg = ImageBuffer::filled(2, 2, ChannelMode::Rgb, &[10, 200, 30]).unwrap();
        let out = composite_over_background(&fg, &Background::Image(bg)).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        for p in out.as_raw().chunks(4) {
            for (got, want) in p.iter().zip([10u8, 200, 30, 255]) {
                assert!((*got as i16 - want as i16).abs() <= 1, "{:?}", p);
            }
        }
    }

    #[test]
    fn flatten_produces_rgb() {
        let src = rgba(&[[0, 0, 0, 0], [10, 20, 30, 255]], 2);
        let flat = flatten(&src, [255, 255, 255]);
        assert_eq!(flat.mode(), ChannelMode::Rgb);
        assert_eq!(flat.as_raw(), &[255, 255, 255, 10, 20, 30]);
        assert!(flatten(&flat, [0, 0, 0]).shares_pixels(&flat));
    }
}
