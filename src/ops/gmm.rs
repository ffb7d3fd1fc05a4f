// ============================================================================
// GAUSSIAN MIXTURE COLOUR MODEL
// ============================================================================
//
// Full-covariance RGB mixture used by foreground segmentation.  Likelihoods
// are evaluated in the log domain so that very peaked components (flat colour
// regions) neither underflow to zero nor produce infinite costs.
// ============================================================================

use rayon::prelude::*;

/// RGB sample as f64 (0..=255 per channel).
pub type Color = [f64; 3];

/// Added to the covariance diagonal of (near-)singular components.
const SINGULAR_VARIANCE: f64 = 0.01;
const KMEANS_ITERATIONS: usize = 10;
/// Upper bound on samples scanned when seeding k-means centres.
const SEED_SCAN_LIMIT: usize = 20_000;

#[derive(Clone, Debug)]
struct Component {
    weight: f64,
    mean: Color,
    inv_cov: [[f64; 3]; 3],
    /// ln(weight) - 0.5 * ln(det(cov)).
    log_norm: f64,
}

impl Component {
    fn log_density(&self, c: &Color) -> f64 {
        let d = [c[0] - self.mean[0], c[1] - self.mean[1], c[2] - self.mean[2]];
        let ic = &self.inv_cov;
        let m = d[0] * (d[0] * ic[0][0] + d[1] * ic[1][0] + d[2] * ic[2][0])
            + d[1] * (d[0] * ic[0][1] + d[1] * ic[1][1] + d[2] * ic[2][1])
            + d[2] * (d[0] * ic[0][2] + d[1] * ic[1][2] + d[2] * ic[2][2]);
        self.log_norm - 0.5 * m
    }
}

/// Mixture of `k` full-covariance Gaussians over RGB.
#[derive(Clone, Debug)]
pub struct GaussianMixture {
    components: Vec<Component>,
}

impl GaussianMixture {
    /// Learn a mixture from samples and their component assignment.
    /// Components with no samples get zero weight and are ignored.
    pub fn fit(samples: &[Color], assignment: &[usize], k: usize) -> Self {
        let k = k.max(1);
        let mut count = vec![0usize; k];
        let mut sum = vec![[0.0f64; 3]; k];
        let mut prod = vec![[[0.0f64; 3]; 3]; k];

        for (c, &ci) in samples.iter().zip(assignment) {
            let ci = ci.min(k - 1);
            count[ci] += 1;
            for i in 0..3 {
                sum[ci][i] += c[i];
                for j in 0..3 {
                    prod[ci][i][j] += c[i] * c[j];
                }
            }
        }

        let total = samples.len().max(1) as f64;
        let components = (0..k)
            .filter(|&ci| count[ci] > 0)
            .map(|ci| {
                let n = count[ci] as f64;
                let mean = [sum[ci][0] / n, sum[ci][1] / n, sum[ci][2] / n];
                let mut cov = [[0.0f64; 3]; 3];
                for i in 0..3 {
                    for j in 0..3 {
                        cov[i][j] = prod[ci][i][j] / n - mean[i] * mean[j];
                    }
                }
                let mut det = determinant(&cov);
                if det <= f64::EPSILON {
                    for (i, row) in cov.iter_mut().enumerate() {
                        row[i] += SINGULAR_VARIANCE;
                    }
                    det = determinant(&cov);
                }
                let weight = n / total;
                Component {
                    weight,
                    mean,
                    inv_cov: inverse(&cov, det),
                    log_norm: weight.ln() - 0.5 * det.ln(),
                }
            })
            .collect();
        Self { components }
    }

    /// Seed with k-means clustering and fit.
    pub fn from_kmeans(samples: &[Color], k: usize) -> Self {
        let assignment = kmeans(samples, k);
        Self::fit(samples, &assignment, k)
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of components that received samples.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Natural log of the (unnormalised) mixture density at `c`.
    /// Negative infinity for an empty mixture.
    pub fn log_likelihood(&self, c: &Color) -> f64 {
        let mut max = f64::NEG_INFINITY;
        let mut terms = [0.0f64; 16];
        let n = self.components.len().min(terms.len());
        for (t, comp) in terms.iter_mut().zip(&self.components) {
            *t = comp.log_density(c);
            max = max.max(*t);
        }
        if !max.is_finite() {
            return max;
        }
        let s: f64 = terms[..n].iter().map(|t| (t - max).exp()).sum();
        max + s.ln()
    }

    /// Index (into the full `k` slots used by `fit`) is not preserved for
    /// empty components, so this returns a dense index in `0..len()`.
    pub fn most_likely_component(&self, c: &Color) -> usize {
        let mut best = 0;
        let mut best_v = f64::NEG_INFINITY;
        for (i, comp) in self.components.iter().enumerate() {
            let v = comp.log_density(c);
            if v > best_v {
                best_v = v;
                best = i;
            }
        }
        best
    }
}

// ---------------------------------------------------------------------------
//  k-means (deterministic maximin seeding + Lloyd iterations)
// ---------------------------------------------------------------------------

/// Cluster `samples` into at most `k` groups; returns one label per sample.
pub fn kmeans(samples: &[Color], k: usize) -> Vec<usize> {
    let k = k.max(1);
    if samples.is_empty() {
        return Vec::new();
    }
    let mut centers = seed_centers(samples, k);
    let mut labels = vec![0usize; samples.len()];

    for _ in 0..KMEANS_ITERATIONS {
        let changed: usize = labels
            .par_iter_mut()
            .zip(samples.par_iter())
            .map(|(label, c)| {
                let nearest = nearest_center(&centers, c);
                if *label != nearest {
                    *label = nearest;
                    1
                } else {
                    0
                }
            })
            .sum();

        let mut sum = vec![[0.0f64; 3]; centers.len()];
        let mut count = vec![0usize; centers.len()];
        for (c, &l) in samples.iter().zip(&labels) {
            count[l] += 1;
            for i in 0..3 {
                sum[l][i] += c[i];
            }
        }
        for (ci, center) in centers.iter_mut().enumerate() {
            if count[ci] > 0 {
                let n = count[ci] as f64;
                *center = [sum[ci][0] / n, sum[ci][1] / n, sum[ci][2] / n];
            }
        }
        if changed == 0 {
            break;
        }
    }
    labels
}

fn seed_centers(samples: &[Color], k: usize) -> Vec<Color> {
    let step = (samples.len() / SEED_SCAN_LIMIT).max(1);
    let mut centers = vec![samples[0]];
    while centers.len() < k {
        let mut far = samples[0];
        let mut far_d = -1.0;
        for c in samples.iter().step_by(step) {
            let d = distance2(&centers[nearest_center(&centers, c)], c);
            if d > far_d {
                far_d = d;
                far = *c;
            }
        }
        centers.push(far);
    }
    centers
}

#[inline]
fn nearest_center(centers: &[Color], c: &Color) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, center) in centers.iter().enumerate() {
        let d = distance2(center, c);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

#[inline]
pub(crate) fn distance2(a: &Color, b: &Color) -> f64 {
    let d0 = a[0] - b[0];
    let d1 = a[1] - b[1];
    let d2 = a[2] - b[2];
    d0 * d0 + d1 * d1 + d2 * d2
}

// ---------------------------------------------------------------------------
//  3×3 helpers
// ---------------------------------------------------------------------------

fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn inverse(m: &[[f64; 3]; 3], det: f64) -> [[f64; 3]; 3] {
    let inv_det = 1.0 / det;
    [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_of_diagonal() {
        let m = [[2.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 8.0]];
        let det = determinant(&m);
        assert_eq!(det, 64.0);
        let inv = inverse(&m, det);
        assert_eq!(inv[0][0], 0.5);
        assert_eq!(inv[1][1], 0.25);
        assert_eq!(inv[2][2], 0.125);
        assert_eq!(inv[0][1], 0.0);
    }

    #[test]
    fn kmeans_separates_two_clusters() {
        let mut samples = vec![[250.0, 250.0, 250.0]; 30];
        samples.extend(vec![[5.0, 5.0, 5.0]; 20]);
        let labels = kmeans(&samples, 2);
        assert!(labels[..30].iter().all(|&l| l == labels[0]));
        assert!(labels[30..].iter().all(|&l| l == labels[30]));
        assert_ne!(labels[0], labels[30]);
    }

    #[test]
    fn flat_colour_model_stays_finite() {
        let samples = vec![[128.0, 64.0, 32.0]; 50];
        let gmm = GaussianMixture::from_kmeans(&samples, 5);
        assert_eq!(gmm.len(), 1);
        let near = gmm.log_likelihood(&[128.0, 64.0, 32.0]);
        let far = gmm.log_likelihood(&[0.0, 255.0, 255.0]);
        assert!(near.is_finite() && far.is_finite());
        assert!(near > far);
    }

    #[test]
    fn likelihood_prefers_matching_model() {
        let mut dark = Vec::new();
        let mut light = Vec::new();
        for i in 0..40 {
            let j = (i % 7) as f64;
            dark.push([10.0 + j, 12.0 + j, 8.0 + j]);
            light.push([230.0 - j, 225.0 - j, 240.0 - j]);
        }
        let dark_model = GaussianMixture::from_kmeans(&dark, 3);
        let light_model = GaussianMixture::from_kmeans(&light, 3);
        let sample = [14.0, 15.0, 11.0];
        assert!(dark_model.log_likelihood(&sample) > light_model.log_likelihood(&sample));
        assert!(dark_model.most_likely_component(&sample) < dark_model.len());
    }

    #[test]
    fn empty_model_is_negative_infinity() {
        let gmm = GaussianMixture::fit(&[], &[], 5);
        assert!(gmm.is_empty());
        assert_eq!(gmm.log_likelihood(&[0.0, 0.0, 0.0]), f64::NEG_INFINITY);
    }
}
