// ============================================================================
// ADJUSTMENT OPERATIONS: pixel-level colour adjustments
// ============================================================================
//
// Every function here is pure: it reads a source buffer and returns a new one.
// Interactive sliders always call these against the buffer captured when the
// gesture started (see `EditSession::begin_adjustment`), never against the
// previous preview, so repeated drags do not compound rounding error.
// Alpha, when present, is copied through untouched.
// ============================================================================

use std::str::FromStr;

use crate::canvas::ImageBuffer;
use crate::ops::filters;

/// ITU-R 601-2 luma weights (what the classic "convert to L" uses).
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Fixed sepia transform, rows produce R', G', B'.
const SEPIA: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

// ============================================================================
// HELPER: per-pixel RGB transform
// ============================================================================

/// Apply `transform` to the RGB samples of every pixel.
/// `transform` receives (r, g, b) as f32 and returns (r, g, b) as f32;
/// results are rounded and clamped to 0..=255.
fn apply_rgb_transform<F>(src: &ImageBuffer, transform: F) -> ImageBuffer
where
    F: Fn(f32, f32, f32) -> (f32, f32, f32) + Sync,
{
    src.map_pixels(|px_in, px_out| {
        let (nr, ng, nb) = transform(px_in[0] as f32, px_in[1] as f32, px_in[2] as f32);
        px_out[0] = nr.round().clamp(0.0, 255.0) as u8;
        px_out[1] = ng.round().clamp(0.0, 255.0) as u8;
        px_out[2] = nb.round().clamp(0.0, 255.0) as u8;
        if px_in.len() == 4 {
            px_out[3] = px_in[3];
        }
    })
}

#[inline]
fn luma(r: f32, g: f32, b: f32) -> f32 {
    LUMA_R * r + LUMA_G * g + LUMA_B * b
}

// ============================================================================
// INSTANT OPERATIONS
// ============================================================================

/// Luminance-weighted greyscale, broadcast back to all three colour channels.
pub fn grayscale(src: &ImageBuffer) -> ImageBuffer {
    apply_rgb_transform(src, |r, g, b| {
        let l = luma(r, g, b);
        (l, l, l)
    })
}

/// Invert R, G, B (`255 - sample`).  Self-inverse.
pub fn negative(src: &ImageBuffer) -> ImageBuffer {
    src.map_pixels(|px_in, px_out| {
        px_out[0] = 255 - px_in[0];
        px_out[1] = 255 - px_in[1];
        px_out[2] = 255 - px_in[2];
        if px_in.len() == 4 {
            px_out[3] = px_in[3];
        }
    })
}

/// Classic sepia tone.  Each output channel is clamped to 255 and then
/// truncated, not rounded.
pub fn sepia_tone(src: &ImageBuffer) -> ImageBuffer {
    src.map_pixels(|px_in, px_out| {
        let rgb = [px_in[0] as f32, px_in[1] as f32, px_in[2] as f32];
        for (out, row) in px_out.iter_mut().zip(SEPIA.iter()) {
            let v = row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2];
            *out = v.clamp(0.0, 255.0) as u8;
        }
        if px_in.len() == 4 {
            px_out[3] = px_in[3];
        }
    })
}

// ============================================================================
// PARAMETRIC ADJUSTMENTS (slider driven)
// ============================================================================

/// Saturation: 0 = greyscale, 1 = unchanged, >1 = oversaturated.
/// Linear interpolation between the greyscale pixel and the original.
pub fn adjust_saturation(src: &ImageBuffer, factor: f32) -> ImageBuffer {
    let factor = factor.max(0.0);
    if factor == 1.0 {
        return src.clone();
    }
    apply_rgb_transform(src, move |r, g, b| {
        let l = luma(r, g, b);
        (
            l + (r - l) * factor,
            l + (g - l) * factor,
            l + (b - l) * factor,
        )
    })
}

/// Brightness: 0 = black, 1 = unchanged, >1 = brighter (clamped at 255).
pub fn adjust_brightness(src: &ImageBuffer, factor: f32) -> ImageBuffer {
    let factor = factor.max(0.0);
    if factor == 1.0 {
        return src.clone();
    }
    apply_rgb_transform(src, move |r, g, b| (r * factor, g * factor, b * factor))
}

// ============================================================================
// ADJUSTMENT KIND
// ============================================================================

/// Every operation the session can apply to the current buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Adjustment {
    Grayscale,
    Negative,
    Sepia,
    Blur { radius: f32 },
    Saturation(f32),
    Brightness(f32),
}

impl Adjustment {
    /// Compute the adjusted buffer from `base`.
    pub fn apply(&self, base: &ImageBuffer) -> ImageBuffer {
        match *self {
            Adjustment::Grayscale => grayscale(base),
            Adjustment::Negative => negative(base),
            Adjustment::Sepia => sepia_tone(base),
            Adjustment::Blur { radius } => filters::gaussian_blur(base, radius),
            Adjustment::Saturation(f) => adjust_saturation(base, f),
            Adjustment::Brightness(f) => adjust_brightness(base, f),
        }
    }

    /// History / status label.
    pub fn description(&self) -> String {
        match self {
            Adjustment::Grayscale => "Grayscale".to_string(),
            Adjustment::Negative => "Negative".to_string(),
            Adjustment::Sepia => "Sepia Tone".to_string(),
            Adjustment::Blur { radius } => format!("Gaussian Blur (radius={})", radius),
            Adjustment::Saturation(f) => format!("Saturation ({:.0}%)", f * 100.0),
            Adjustment::Brightness(f) => format!("Brightness ({:.0}%)", f * 100.0),
        }
    }
}

/// Radius used for `blur` when none is given.
pub const DEFAULT_BLUR_RADIUS: f32 = 2.0;

impl FromStr for Adjustment {
    type Err = String;

    /// `grayscale`, `negative`, `sepia`, `blur[=R]`, `saturation=F`, `brightness=F`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Adjustment::parse_with_blur_radius(s, DEFAULT_BLUR_RADIUS)
    }
}

impl Adjustment {
    /// Like `str::parse`, but a bare `blur` gets `blur_radius`.
    pub fn parse_with_blur_radius(s: &str, blur_radius: f32) -> Result<Self, String> {
        let (name, value) = match s.split_once('=') {
            Some((n, v)) => (n.trim().to_lowercase(), Some(v.trim())),
            None => (s.trim().to_lowercase(), None),
        };
        let parse_value = |v: Option<&str>| -> Result<f32, String> {
            let v = v.ok_or_else(|| format!("'{}' needs a value, e.g. {}=1.5", name, name))?;
            let f: f32 = v.parse().map_err(|_| format!("invalid number '{}' for {}", v, name))?;
            if !f.is_finite() || f < 0.0 {
                return Err(format!("{} must be a non-negative number, got {}", name, v));
            }
            Ok(f)
        };
        match name.as_str() {
            "grayscale" | "greyscale" | "gray" => Ok(Adjustment::Grayscale),
            "negative" | "invert" => Ok(Adjustment::Negative),
            "sepia" => Ok(Adjustment::Sepia),
            "blur" => {
                let radius = if value.is_some() { parse_value(value)? } else { blur_radius };
                Ok(Adjustment::Blur { radius })
            }
            "saturation" => Ok(Adjustment::Saturation(parse_value(value)?)),
            "brightness" => Ok(Adjustment::Brightness(parse_value(value)?)),
            other => Err(format!("unknown adjustment '{}'", other)),
        }
    }
}
