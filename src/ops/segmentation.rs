// ============================================================================
// FOREGROUND SEGMENTATION: iterative colour-model graph cut
// ============================================================================
//
// Rectangle-seeded foreground extraction:
//   1. pixels outside the seed region are definite background, pixels inside
//      are probable foreground;
//   2. fit one colour mixture to each side;
//   3. solve a min cut whose data term is each pixel's colour likelihood and
//      whose smoothness term discourages cutting between similar neighbours;
//   4. relabel the probable pixels from the cut and repeat.
// Only the final binary mask leaves this module.
// ============================================================================

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::canvas::{BufferError, ImageBuffer};
use crate::ops::gmm::{self, Color, GaussianMixture};
use crate::ops::graph_cut::FlowGraph;

/// Iterations used when the caller does not override them.
pub const DEFAULT_ITERATIONS: u32 = 5;
/// Inset of the default seed region on every side, in pixels.
pub const DEFAULT_MARGIN: u32 = 10;
/// Components per colour mixture.
pub const DEFAULT_COMPONENTS: usize = 5;

/// Smoothness weight between 4-connected neighbours.
const GAMMA: f64 = 50.0;
/// Capacity that pins definite labels to their terminal.
const LAMBDA: f64 = 9.0 * GAMMA;

// Per-pixel label arena.
const BGD: u8 = 0;
const FGD: u8 = 1;
const PR_BGD: u8 = 2;
const PR_FGD: u8 = 3;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    /// No image is loaded.
    NoImage,
    /// The image leaves no room for the margin on some side.
    ImageTooSmall { width: u32, height: u32, margin: u32 },
    /// The seed region is empty once clamped to the image.
    InvalidRegion(SeedRegion),
    /// The seed region covers the whole image so nothing is known background.
    NoBackgroundSamples,
    Cancelled,
    /// The worker panicked or disconnected.
    WorkerFailed(String),
}

impl std::fmt::Display for SegmentationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentationError::NoImage => write!(f, "no image loaded"),
            SegmentationError::ImageTooSmall { width, height, margin } => write!(
                f,
                "image {}x{} is too small for background removal (needs more than {} px per side)",
                width,
                height,
                margin * 2
            ),
            SegmentationError::InvalidRegion(r) => write!(
                f,
                "seed region {},{} {}x{} is empty inside the image",
                r.x, r.y, r.width, r.height
            ),
            SegmentationError::NoBackgroundSamples => {
                write!(f, "seed region covers the whole image; no background to learn from")
            }
            SegmentationError::Cancelled => write!(f, "background removal was cancelled"),
            SegmentationError::WorkerFailed(e) => write!(f, "segmentation worker failed: {}", e),
        }
    }
}

impl std::error::Error for SegmentationError {}

// ============================================================================
// SEED REGION / PARAMETERS / MASK
// ============================================================================

/// Rectangle hint: inside is probable foreground, outside is background.
/// Signed so callers can pass regions hanging off the image; they are clamped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl SeedRegion {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// The whole image inset by `margin` on each side.
    pub fn inset(width: u32, height: u32, margin: u32) -> Self {
        let m = margin as i64;
        Self {
            x: m as i32,
            y: m as i32,
            width: (width as i64 - 2 * m).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            height: (height as i64 - 2 * m).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        }
    }

    /// Clamp to a `width`×`height` image.  Returns `(x0, y0, x1, y1)` with
    /// exclusive end, or `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = (self.x as i64).clamp(0, width as i64);
        let y0 = (self.y as i64).clamp(0, height as i64);
        let x1 = (self.x as i64 + self.width as i64).clamp(0, width as i64);
        let y1 = (self.y as i64 + self.height as i64).clamp(0, height as i64);
        if x1 <= x0 || y1 <= y0 {
            None
        } else {
            Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
        }
    }
}

impl FromStr for SeedRegion {
    type Err = String;

    /// `X,Y,W,H`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected X,Y,W,H, got '{}'", s));
        }
        let mut v = [0i32; 4];
        for (slot, p) in v.iter_mut().zip(&parts) {
            *slot = p.parse().map_err(|_| format!("invalid number '{}' in seed region", p))?;
        }
        Ok(SeedRegion::new(v[0], v[1], v[2], v[3]))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentationParams {
    pub iterations: u32,
    pub margin: u32,
    pub components: usize,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            margin: DEFAULT_MARGIN,
            components: DEFAULT_COMPONENTS,
        }
    }
}

/// Final binary mask, one byte per pixel: 1 = foreground, 0 = background.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl SegmentationMask {
    /// Any non-zero value is treated as foreground.
    pub fn new(width: u32, height: u32, mut data: Vec<u8>) -> Result<Self, BufferError> {
        if width == 0 || height == 0 {
            return Err(BufferError::InvalidDimensions { width, height });
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(BufferError::LengthMismatch { expected, actual: data.len() });
        }
        for v in &mut data {
            *v = (*v != 0) as u8;
        }
        Ok(Self { width, height, data })
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

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == 1).count()
    }
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Check everything that can be rejected before any work is done and
/// return the clamped seed rectangle.
pub fn validate_request(
    buf: &ImageBuffer,
    seed: Option<SeedRegion>,
    params: &SegmentationParams,
) -> Result<(u32, u32, u32, u32), SegmentationError> {
    let (w, h) = buf.dimensions();
    let margin = params.margin;
    if w as u64 <= 2 * margin as u64 || h as u64 <= 2 * margin as u64 {
        return Err(SegmentationError::ImageTooSmall { width: w, height: h, margin });
    }
    let region = seed.unwrap_or_else(|| SeedRegion::inset(w, h, margin));
    let rect = region
        .clamp_to(w, h)
        .ok_or(SegmentationError::InvalidRegion(region))?;
    if rect == (0, 0, w, h) {
        return Err(SegmentationError::NoBackgroundSamples);
    }
    Ok(rect)
}

/// Blocking segmentation with no cancellation or progress reporting.
pub fn segment_foreground(
    buf: &ImageBuffer,
    seed: Option<SeedRegion>,
    params: &SegmentationParams,
) -> Result<SegmentationMask, SegmentationError> {
    segment_foreground_with(buf, seed, params, &AtomicBool::new(false), |_, _| {})
}

/// Segmentation that checks `cancel` between iterations and reports
/// `(finished_iterations, total)` after each one.
pub fn segment_foreground_with<P>(
    buf: &ImageBuffer,
    seed: Option<SeedRegion>,
    params: &SegmentationParams,
    cancel: &AtomicBool,
    mut progress: P,
) -> Result<SegmentationMask, SegmentationError>
where
    P: FnMut(u32, u32),
{
    let (x0, y0, x1, y1) = validate_request(buf, seed, params)?;
    let (w, h) = buf.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let k = params.components.max(1);
    let iterations = params.iterations.max(1);

    let colors: Vec<Color> = buf
        .as_raw()
        .chunks_exact(buf.channels())
        .map(|p| [p[0] as f64, p[1] as f64, p[2] as f64])
        .collect();

    let mut labels = vec![BGD; wu * hu];
    for y in y0..y1 {
        let row = y as usize * wu;
        labels[row + x0 as usize..row + x1 as usize].fill(PR_FGD);
    }

    let links = NeighbourLinks::new(&colors, wu, hu);

    let (bg_samples, fg_samples) = split_samples(&colors, &labels);
    let mut bg_model = GaussianMixture::from_kmeans(&bg_samples, k);
    let mut fg_model = GaussianMixture::from_kmeans(&fg_samples, k);

    for iter in 0..iterations {
        if cancel.load(Ordering::Relaxed) {
            return Err(SegmentationError::Cancelled);
        }

        let (bg_samples, fg_samples) = split_samples(&colors, &labels);
        if bg_samples.is_empty() {
            return Err(SegmentationError::NoBackgroundSamples);
        }
        if fg_samples.is_empty() {
            // Everything collapsed to background; further cuts cannot change that.
            progress(iterations, iterations);
            break;
        }
        bg_model = relearn(&bg_model, &bg_samples, k);
        fg_model = relearn(&fg_model, &fg_samples, k);

        let mut graph = build_graph(&colors, &labels, &links, &bg_model, &fg_model, wu, hu);
        graph.max_flow();
        let side = graph.source_side();

        for (i, label) in labels.iter_mut().enumerate() {
            if *label == PR_BGD || *label == PR_FGD {
                *label = if side[i] { PR_FGD } else { PR_BGD };
            }
        }
        progress(iter + 1, iterations);
    }

    if cancel.load(Ordering::Relaxed) {
        return Err(SegmentationError::Cancelled);
    }

    let data = labels
        .iter()
        .map(|&l| if l == BGD || l == PR_BGD { 0 } else { 1 })
        .collect();
    Ok(SegmentationMask { width: w, height: h, data })
}

// ============================================================================
// INTERNALS
// ============================================================================

fn split_samples(colors: &[Color], labels: &[u8]) -> (Vec<Color>, Vec<Color>) {
    let mut bg = Vec::new();
    let mut fg = Vec::new();
    for (c, &l) in colors.iter().zip(labels) {
        if l == BGD || l == PR_BGD {
            bg.push(*c);
        } else {
            fg.push(*c);
        }
    }
    (bg, fg)
}

/// Assign each sample to its most likely component and refit.
fn relearn(model: &GaussianMixture, samples: &[Color], k: usize) -> GaussianMixture {
    if model.is_empty() {
        return GaussianMixture::from_kmeans(samples, k);
    }
    let assignment: Vec<usize> = samples
        .par_iter()
        .map(|c| model.most_likely_component(c))
        .collect();
    GaussianMixture::fit(samples, &assignment, k)
}

/// Smoothness weights to the right, down, down-right and down-left
/// neighbours of every pixel (0 where the neighbour is outside the image).
struct NeighbourLinks {
    weights: Vec<[f64; 4]>,
}

const NEIGHBOURS: [(isize, isize); 4] = [(1, 0), (0, 1), (1, 1), (-1, 1)];

impl NeighbourLinks {
    fn new(colors: &[Color], w: usize, h: usize) -> Self {
        let neighbour = |x: usize, y: usize, n: usize| -> Option<usize> {
            let (dx, dy) = NEIGHBOURS[n];
            let nx = x as isize + dx;
            let ny = y as isize + dy;
            if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                None
            } else {
                Some(ny as usize * w + nx as usize)
            }
        };

        let mut total = 0.0;
        let mut pairs = 0usize;
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                for n in 0..4 {
                    if let Some(j) = neighbour(x, y, n) {
                        total += gmm::distance2(&colors[i], &colors[j]);
                        pairs += 1;
                    }
                }
            }
        }
        let beta = if total > 0.0 { pairs as f64 / (2.0 * total) } else { 0.0 };

        let diag = GAMMA / std::f64::consts::SQRT_2;
        let weights = (0..w * h)
            .into_par_iter()
            .map(|i| {
                let (x, y) = (i % w, i / w);
                let mut out = [0.0f64; 4];
                for (n, slot) in out.iter_mut().enumerate() {
                    if let Some(j) = neighbour(x, y, n) {
                        let scale = if n < 2 { GAMMA } else { diag };
                        *slot = scale * (-beta * gmm::distance2(&colors[i], &colors[j])).exp();
                    }
                }
                out
            })
            .collect();
        Self { weights }
    }
}

fn build_graph(
    colors: &[Color],
    labels: &[u8],
    links: &NeighbourLinks,
    bg_model: &GaussianMixture,
    fg_model: &GaussianMixture,
    w: usize,
    h: usize,
) -> FlowGraph {
    let n = w * h;
    let mut graph = FlowGraph::new(n, n * 5);

    // (from_source, to_sink) per pixel
    let terminals: Vec<(f64, f64)> = colors
        .par_iter()
        .zip(labels.par_iter())
        .map(|(c, &l)| match l {
            BGD => (0.0, LAMBDA),
            FGD => (LAMBDA, 0.0),
            _ => (-bg_model.log_likelihood(c), -fg_model.log_likelihood(c)),
        })
        .collect();

    for (i, &(from_source, to_sink)) in terminals.iter().enumerate() {
        graph.add_terminal_weights(i, from_source, to_sink);
    }

    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            for (ni, &(dx, dy)) in NEIGHBOURS.iter().enumerate() {
                let weight = links.weights[i][ni];
                if weight <= 0.0 {
                    continue;
                }
                let j = (y as isize + dy) as usize * w + (x as isize + dx) as usize;
                graph.add_edge(i, j, weight, weight);
            }
        }
    }
    graph
}
