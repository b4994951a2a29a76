//! Image-plane to world-plane projection through a planar homography.
//!
//! The fit is a normalized DLT (Hartley normalization, null vector of the
//! full 9-unknown system). With more than four pairs it runs inside a
//! seeded RANSAC loop and is refit on the inlier set.

use crate::geometry::Point2D;
use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, warn};

/// Smallest number of image/world pairs that pins down a homography
pub const MIN_CORRESPONDENCES: usize = 4;

const W_EPSILON: f64 = 1e-9;
const RANK_EPSILON: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProjectorError {
    #[error(
        "insufficient correspondences: need at least 4 pairs, got {image} image and {world} world points"
    )]
    InsufficientCorrespondences { image: usize, world: usize },
    #[error("image and world point lists differ in length ({image} vs {world})")]
    MismatchedCorrespondences { image: usize, world: usize },
    #[error("degenerate correspondences: {0}")]
    Degenerate(String),
}

/// A 3x3 projective transform from image pixels to world-plane meters
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Maps a point through the homography. Returns `None` when the point
    /// lands on (or numerically next to) the line at infinity.
    pub fn apply(&self, point: Point2D) -> Option<Point2D> {
        let p = self.matrix * Vector3::new(point.x, point.y, 1.0);
        if p[2].abs() < W_EPSILON {
            return None;
        }
        Some(Point2D::new(p[0] / p[2], p[1] / p[2]))
    }

    /// Distance between the projection of `src` and `dst`
    pub fn reprojection_error(&self, src: Point2D, dst: Point2D) -> f64 {
        match self.apply(src) {
            Some(p) => p.distance(&dst),
            None => f64::INFINITY,
        }
    }
}

/// Camera calibration state, fixed at startup
#[derive(Debug, Clone, PartialEq)]
pub enum Calibration {
    Uncalibrated,
    Calibrated { homography: Homography, fps: f64 },
}

impl Calibration {
    /// Fits a homography and tags it with the stream's frame rate
    pub fn from_correspondences(
        image_points: &[Point2D],
        world_points: &[Point2D],
        fps: f64,
    ) -> Result<Self, ProjectorError> {
        let homography = estimate_homography(image_points, world_points)?;
        Ok(Calibration::Calibrated { homography, fps })
    }

    pub fn homography(&self) -> Option<&Homography> {
        match self {
            Calibration::Uncalibrated => None,
            Calibration::Calibrated { homography, .. } => Some(homography),
        }
    }

    pub fn fps(&self) -> Option<f64> {
        match self {
            Calibration::Uncalibrated => None,
            Calibration::Calibrated { fps, .. } => Some(*fps),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self, Calibration::Calibrated { .. })
    }
}

/// Projects an image point onto the world plane.
///
/// Without a homography, or when the point maps to infinity, the zero vector
/// comes back. That value is a sentinel, not a position: branch on the
/// calibration state, never on the output.
pub fn project(point: Point2D, homography: Option<&Homography>) -> Point2D {
    homography
        .and_then(|h| h.apply(point))
        .unwrap_or(Point2D::ZERO)
}

/// RANSAC settings for [`estimate_homography_with`]
#[derive(Debug, Clone)]
pub struct RansacConfig {
    pub max_iters: usize,
    /// Reprojection error (world units) under which a pair counts as an inlier
    pub inlier_threshold: f64,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 500,
            inlier_threshold: 3.0,
            seed: 0,
        }
    }
}

/// Estimates the image-to-world homography with default RANSAC settings
pub fn estimate_homography(
    image_points: &[Point2D],
    world_points: &[Point2D],
) -> Result<Homography, ProjectorError> {
    estimate_homography_with(image_points, world_points, &RansacConfig::default())
}

pub fn estimate_homography_with(
    image_points: &[Point2D],
    world_points: &[Point2D],
    config: &RansacConfig,
) -> Result<Homography, ProjectorError> {
    if image_points.len() < MIN_CORRESPONDENCES || world_points.len() < MIN_CORRESPONDENCES {
        return Err(ProjectorError::InsufficientCorrespondences {
            image: image_points.len(),
            world: world_points.len(),
        });
    }
    if image_points.len() != world_points.len() {
        return Err(ProjectorError::MismatchedCorrespondences {
            image: image_points.len(),
            world: world_points.len(),
        });
    }

    let n = image_points.len();
    if n == MIN_CORRESPONDENCES {
        return fit_dlt(image_points, world_points);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(Homography, usize)> = None;

    for _ in 0..config.max_iters {
        let sample = rand::seq::index::sample(&mut rng, n, MIN_CORRESPONDENCES);
        let src: Vec<Point2D> = sample.iter().map(|i| image_points[i]).collect();
        let dst: Vec<Point2D> = sample.iter().map(|i| world_points[i]).collect();

        let Ok(h) = fit_dlt(&src, &dst) else {
            continue;
        };
        let inliers = count_inliers(&h, image_points, world_points, config.inlier_threshold);
        if best.as_ref().is_none_or(|(_, count)| inliers > *count) {
            best = Some((h, inliers));
            if inliers == n {
                break;
            }
        }
    }

    match best {
        Some((h, inliers)) if inliers >= MIN_CORRESPONDENCES => {
            let (src, dst): (Vec<Point2D>, Vec<Point2D>) = image_points
                .iter()
                .zip(world_points)
                .filter(|(s, d)| h.reprojection_error(**s, **d) < config.inlier_threshold)
                .map(|(s, d)| (*s, *d))
                .unzip();
            debug!("homography RANSAC kept {}/{} correspondences", inliers, n);
            fit_dlt(&src, &dst)
        }
        _ => {
            warn!("homography RANSAC found no consensus, fitting all {} pairs", n);
            fit_dlt(image_points, world_points)
        }
    }
}

fn count_inliers(h: &Homography, src: &[Point2D], dst: &[Point2D], threshold: f64) -> usize {
    src.iter()
        .zip(dst)
        .filter(|(s, d)| h.reprojection_error(**s, **d) < threshold)
        .count()
}

/// Translates the centroid to the origin and scales the mean distance to sqrt(2).
/// Returns the similarity transform and the moved points.
fn normalize(points: &[Point2D]) -> (Matrix3<f64>, Vec<Point2D>) {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let centroid = Point2D::new(cx, cy);
    let mean_dist = points.iter().map(|p| p.distance(&centroid)).sum::<f64>() / n;

    let s = if mean_dist > RANK_EPSILON {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let moved = points
        .iter()
        .map(|p| Point2D::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    (t, moved)
}

/// Direct linear transform over all pairs.
///
/// `h` is the null vector of the 2n x 9 system, taken as the eigenvector of
/// the smallest eigenvalue of AᵀA. A second near-zero eigenvalue means the
/// pairs do not pin down a unique transform.
fn fit_dlt(src: &[Point2D], dst: &[Point2D]) -> Result<Homography, ProjectorError> {
    let (t_src, src_n) = normalize(src);
    let (t_dst, dst_n) = normalize(dst);

    let n = src_n.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
        // [ 0  0  0 | -x -y -1 |  v*x  v*y  v ]
        a[(2 * i, 3)] = -s.x;
        a[(2 * i, 4)] = -s.y;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = d.y * s.x;
        a[(2 * i, 7)] = d.y * s.y;
        a[(2 * i, 8)] = d.y;

        // [ x  y  1 |  0  0  0 | -u*x -u*y -u ]
        a[(2 * i + 1, 0)] = s.x;
        a[(2 * i + 1, 1)] = s.y;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -d.x * s.x;
        a[(2 * i + 1, 7)] = -d.x * s.y;
        a[(2 * i + 1, 8)] = -d.x;
    }

    let ata = a.transpose() * &a;
    let eig = SymmetricEigen::new(ata);

    let mut order: Vec<usize> = (0..9).collect();
    order.sort_by(|&i, &j| {
        eig.eigenvalues[i]
            .abs()
            .total_cmp(&eig.eigenvalues[j].abs())
    });
    let largest = eig.eigenvalues[order[8]].abs();
    let second = eig.eigenvalues[order[1]].abs();
    if largest <= RANK_EPSILON || second <= RANK_EPSILON * largest {
        return Err(ProjectorError::Degenerate(
            "correspondences leave the transform underdetermined".to_string(),
        ));
    }

    let h = eig.eigenvectors.column(order[0]);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    if h_norm.determinant().abs() < RANK_EPSILON {
        return Err(ProjectorError::Degenerate(
            "fitted transform is singular".to_string(),
        ));
    }

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| ProjectorError::Degenerate("world normalization not invertible".to_string()))?;
    let mut matrix = t_dst_inv * h_norm * t_src;

    let scale = matrix[(2, 2)];
    if scale.abs() > RANK_EPSILON {
        matrix /= scale;
    }
    Ok(Homography { matrix })
}
