//! Image plane to ground plane mapping.

use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use tracing::info;

use crate::error::{Error, Result};

// smallest accepted ratio between the second-smallest and the largest singular
// value of the DLT system; below it the solution is not unique
const RANK_TOLERANCE: f64 = 1e-8;
const SINGULAR_TOLERANCE: f64 = 1e-10;

/// A 3x3 projective transform, normalized so that `h[(2, 2)] == 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    /// Least-squares DLT estimate of `H` with `dst ~ H * src`.
    ///
    /// Needs at least four correspondences that pin down a unique,
    /// non-singular transform; anything else is `InvalidGeometry`.
    pub fn estimate(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Self> {
        if src.len() != dst.len() {
            return Err(Error::InvalidGeometry(format!(
                "{} source points but {} destination points",
                src.len(),
                dst.len()
            )));
        }

        if src.len() < 4 {
            return Err(Error::InvalidGeometry(format!(
                "at least 4 correspondences required, got {}",
                src.len()
            )));
        }

        if src.iter().chain(dst.iter()).any(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(Error::InvalidGeometry("non-finite coordinate".into()));
        }

        let (s, ts) = normalize_points(src);
        let (d, td) = normalize_points(dst);

        // Build A (2N x 9), padded with zero rows so the SVD always yields a full V
        let n = src.len();
        let rows = (2 * n).max(9);
        let mut a = DMatrix::<f64>::zeros(rows, 9);

        for k in 0..n {
            let (x, y) = (s[k].x, s[k].y);
            let (u, v) = (d[k].x, d[k].y);

            // [ -x -y -1   0  0  0   u*x u*y u ]
            a[(2 * k, 0)] = -x;
            a[(2 * k, 1)] = -y;
            a[(2 * k, 2)] = -1.0;
            a[(2 * k, 6)] = u * x;
            a[(2 * k, 7)] = u * y;
            a[(2 * k, 8)] = u;

            // [ 0  0  0  -x -y -1   v*x v*y v ]
            a[(2 * k + 1, 3)] = -x;
            a[(2 * k + 1, 4)] = -y;
            a[(2 * k + 1, 5)] = -1.0;
            a[(2 * k + 1, 6)] = v * x;
            a[(2 * k + 1, 7)] = v * y;
            a[(2 * k + 1, 8)] = v;
        }

        let svd = a.svd(false, true);
        let vt = svd
            .v_t
            .ok_or_else(|| Error::InvalidGeometry("SVD did not converge".into()))?;

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&i, &j| svd.singular_values[i].total_cmp(&svd.singular_values[j]));

        let largest = svd.singular_values[order[order.len() - 1]];
        let second = svd.singular_values[order[1]];
        if largest <= 0.0 || second / largest < RANK_TOLERANCE {
            return Err(Error::InvalidGeometry(
                "correspondences are degenerate (collinear or repeated points)".into(),
            ));
        }

        // right singular vector of the smallest singular value
        let h = vt.row(order[0]);
        let hn =
            Matrix3::<f64>::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

        // Denormalize: H = Td^{-1} * Hn * Ts
        let td_inv = td
            .try_inverse()
            .ok_or_else(|| Error::InvalidGeometry("destination points coincide".into()))?;
        let h = td_inv * hn * ts;

        let norm = h.norm();
        let det = h.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_TOLERANCE * norm.powi(3) {
            return Err(Error::InvalidGeometry("transform is singular".into()));
        }

        let scale = h[(2, 2)];
        if scale.abs() < SINGULAR_TOLERANCE * norm {
            return Err(Error::InvalidGeometry(
                "transform maps the source origin to infinity".into(),
            ));
        }

        Ok(Self::new(h / scale))
    }

    /// Projects `p` through `H`, dividing by the homogeneous scale.
    ///
    /// Points on the horizon line (zero scale) come out non-finite.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = v[2];

        Point2::new(v[0] / w, v[1] / w)
    }

    pub fn inverse(&self) -> Option<Self> {
        let inv = self.h.try_inverse()?;
        let scale = inv[(2, 2)];

        if scale.abs() < SINGULAR_TOLERANCE {
            return Some(Self::new(inv));
        }

        Some(Self::new(inv / scale))
    }
}

// Hartley normalization: translate to centroid, scale so mean distance = sqrt(2)
fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / n;

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-12 {
        2.0_f64.sqrt() / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);

    let out = pts
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();

    (out, t)
}

/// Holds the image-to-world transform once it has been computed.
#[derive(Clone, Debug, Default)]
pub struct CoordinateMapper {
    transform: Option<Homography>,
}

impl CoordinateMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transform(transform: Homography) -> Self {
        Self {
            transform: Some(transform),
        }
    }

    /// Computes and installs the transform. A failed computation leaves any
    /// previously installed transform in place.
    pub fn compute(&mut self, src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Homography> {
        let h = Homography::estimate(src, dst)?;
        info!(h = ?h.to_array(), "homography computed");

        self.transform = Some(h);

        Ok(h)
    }

    #[inline]
    pub fn transform(&self) -> Option<&Homography> {
        self.transform.as_ref()
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.transform.is_some()
    }

    pub fn transform_point(&self, p: Point2<f64>) -> Result<Point2<f64>> {
        let h = self.transform.as_ref().ok_or(Error::TransformNotInitialized)?;

        Ok(h.apply(p))
    }

    pub fn transform_points(&self, pts: &[Point2<f64>]) -> Result<Vec<Point2<f64>>> {
        let h = self.transform.as_ref().ok_or(Error::TransformNotInitialized)?;

        Ok(pts.iter().map(|&p| h.apply(p)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        let dx = (a.x - b.x).abs();
        let dy = (a.y - b.y).abs();
        assert!(
            dx < tol && dy < tol,
            "expected ({:.9},{:.9}) ~ ({:.9},{:.9}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    fn pts(raw: &[[f64; 2]]) -> Vec<Point2<f64>> {
        raw.iter().map(|p| Point2::new(p[0], p[1])).collect()
    }

    #[test]
    fn four_points_round_trip() {
        let src = pts(&[[100.0, 200.0], [540.0, 200.0], [540.0, 380.0], [100.0, 380.0]]);
        let dst = pts(&[[0.0, 0.0], [4.0, 0.0], [4.0, 3.0], [0.0, 3.0]]);

        let mut mapper = CoordinateMapper::new();
        mapper.compute(&src, &dst).unwrap();

        for (s, d) in src.iter().zip(dst.iter()) {
            assert_close(mapper.transform_point(*s).unwrap(), *d, 1e-9);
        }

        assert_close(
            mapper.transform_point(Point2::new(320.0, 290.0)).unwrap(),
            Point2::new(2.0, 1.5),
            1e-9,
        );
    }

    #[test]
    fn recovers_perspective_transform() {
        let ground_truth = Homography::new(Matrix3::new(
            0.8, 0.05, 120.0, //
            -0.02, 1.1, 80.0, //
            0.0009, -0.0004, 1.0,
        ));

        let src = pts(&[[0.0, 0.0], [180.0, 0.0], [180.0, 130.0], [0.0, 130.0]]);
        let dst: Vec<_> = src.iter().map(|&p| ground_truth.apply(p)).collect();

        let h = Homography::estimate(&src, &dst).unwrap();
        for p in pts(&[[0.0, 0.0], [60.0, 40.0], [150.0, 120.0], [-30.0, 200.0]]) {
            assert_close(h.apply(p), ground_truth.apply(p), 1e-6);
        }

        let inv = h.inverse().unwrap();
        for p in &src {
            assert_close(inv.apply(h.apply(*p)), *p, 1e-6);
        }
    }

    #[test]
    fn overdetermined_least_squares() {
        let ground_truth = Homography::new(Matrix3::new(
            1.0, 0.2, 12.0, //
            -0.1, 0.9, 6.0, //
            0.0006, 0.0004, 1.0,
        ));

        let src: Vec<Point2<f64>> = (0..3)
            .flat_map(|y| (0..3).map(move |x| Point2::new(x as f64 * 40.0, y as f64 * 50.0)))
            .collect();
        let dst: Vec<_> = src.iter().map(|&p| ground_truth.apply(p)).collect();

        let h = Homography::estimate(&src, &dst).unwrap();
        for p in pts(&[[0.0, 0.0], [60.0, 40.0], [80.0, 90.0]]) {
            assert_close(h.apply(p), ground_truth.apply(p), 1e-6);
        }
    }

    #[test]
    fn too_few_points_fail() {
        let src = pts(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);
        let dst = src.clone();

        assert!(matches!(
            Homography::estimate(&src, &dst),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            Homography::estimate(&[], &[]),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn collinear_points_fail() {
        let src = pts(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]]);
        let dst = pts(&[[0.0, 0.0], [4.0, 0.0], [4.0, 3.0], [0.0, 3.0]]);

        assert!(matches!(
            Homography::estimate(&src, &dst),
            Err(Error::InvalidGeometry(_))
        ));

        // three of four on one line
        let src = pts(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [0.0, 1.0]]);
        assert!(matches!(
            Homography::estimate(&src, &dst),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn collapsed_destination_fails() {
        let src = pts(&[[0.0, 0.0], [4.0, 0.0], [4.0, 3.0], [0.0, 3.0]]);
        let dst = pts(&[[1.0, 1.0]; 4]);

        assert!(matches!(
            Homography::estimate(&src, &dst),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn mismatched_lengths_fail() {
        let src = pts(&[[0.0, 0.0]; 4]);
        let dst = pts(&[[1.0, 1.0]; 5]);

        assert!(matches!(
            Homography::estimate(&src, &dst),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn uninitialized_mapper_refuses() {
        let mapper = CoordinateMapper::new();

        assert!(!mapper.is_initialized());
        assert!(matches!(
            mapper.transform_point(Point2::new(1.0, 2.0)),
            Err(Error::TransformNotInitialized)
        ));
        assert!(matches!(
            mapper.transform_points(&[]),
            Err(Error::TransformNotInitialized)
        ));
    }

    #[test]
    fn batch_matches_single_exactly() {
        let src = pts(&[[10.0, 20.0], [630.0, 25.0], [600.0, 470.0], [40.0, 460.0]]);
        let dst = pts(&[[0.0, 0.0], [12.0, 0.0], [12.0, 30.0], [0.0, 30.0]]);
        let mapper = CoordinateMapper::with_transform(Homography::estimate(&src, &dst).unwrap());

        let probe = pts(&[[0.0, 0.0], [123.4, 56.7], [320.0, 240.0], [639.0, 479.0]]);
        let batch = mapper.transform_points(&probe).unwrap();

        for (p, b) in probe.iter().zip(batch.iter()) {
            assert_eq!(mapper.transform_point(*p).unwrap(), *b);
        }
    }

    #[test]
    fn failed_compute_keeps_previous_transform() {
        let src = pts(&[[0.0, 0.0], [4.0, 0.0], [4.0, 3.0], [0.0, 3.0]]);
        let mut mapper = CoordinateMapper::new();
        let h = mapper.compute(&src, &src).unwrap();

        assert!(mapper.compute(&src[..3], &src[..3]).is_err());
        assert_eq!(mapper.transform(), Some(&h));
    }
}
