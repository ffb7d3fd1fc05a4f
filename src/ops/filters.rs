// ============================================================================
// IMAGE FILTERS: Gaussian blur
// ============================================================================

use rayon::prelude::*;

use crate::canvas::ImageBuffer;

/// Gaussian blur where `radius` is the standard deviation in pixels.
/// `radius <= 0` (or NaN) is the identity.  All channels, alpha included,
/// are filtered.
pub fn gaussian_blur(src: &ImageBuffer, radius: f32) -> ImageBuffer {
    if !(radius > 0.0) {
        return src.clone();
    }
    parallel_gaussian_blur(src, radius)
}

// ---------------------------------------------------------------------------
//  Parallel separable Gaussian blur (rayon)
// ---------------------------------------------------------------------------

/// Build a 1-D Gaussian kernel truncated at ceil(3*sigma).
fn build_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    if radius == 0 {
        return vec![1.0];
    }
    let len = radius * 2 + 1;
    let mut kernel = vec![0.0f32; len];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;
    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - radius as f32;
        let v = (-x * x / s2).exp();
        *k = v;
        sum += v;
    }
    let inv = 1.0 / sum;
    for v in &mut kernel {
        *v *= inv;
    }
    kernel
}

/// Separable blur on an f32 copy of the samples; edges clamp.
fn parallel_gaussian_blur(src: &ImageBuffer, sigma: f32) -> ImageBuffer {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let ch = src.channels();
    let stride = w * ch;

    let kernel = build_gaussian_kernel(sigma);
    let radius = kernel.len() / 2;
    let buf_in: Vec<f32> = src.as_raw().iter().map(|&b| b as f32).collect();

    // --- Horizontal pass (parallel by row) ---
    let mut buf_h = vec![0.0f32; buf_in.len()];
    buf_h.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        let row_in = &buf_in[y * stride..(y + 1) * stride];
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = (x as isize + ki as isize - radius as isize).clamp(0, w as isize - 1) as usize;
                let idx = sx * ch;
                for c in 0..ch {
                    acc[c] += row_in[idx + c] * kv;
                }
            }
            row_out[x * ch..x * ch + ch].copy_from_slice(&acc[..ch]);
        }
    });

    // --- Vertical pass (parallel by row) ---
    let mut buf_v = vec![0.0f32; buf_in.len()];
    buf_v.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = (y as isize + ki as isize - radius as isize).clamp(0, h as isize - 1) as usize;
                let idx = sy * stride + x * ch;
                for c in 0..ch {
                    acc[c] += buf_h[idx + c] * kv;
                }
            }
            row_out[x * ch..x * ch + ch].copy_from_slice(&acc[..ch]);
        }
    });

    let dst_raw: Vec<u8> = buf_v.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect();
    src.with_data(src.mode(), dst_raw).unwrap_or_else(|_| src.clone())
}
