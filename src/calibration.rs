//! Camera intrinsics produced by an offline calibration run.
//!
//! The file layout is YAML with a row-major `camera_matrix` and the
//! Brown-Conrady coefficients `[k1, k2, p1, p2, k3]`, given either flat or as
//! a column of one-element rows.

use std::path::Path;

use nalgebra::Point2;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};

const UNDISTORT_ITERATIONS: usize = 20;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum Coefficients {
    Flat(Vec<f64>),
    Column(Vec<Vec<f64>>),
}

impl Coefficients {
    fn flatten(self) -> Vec<f64> {
        match self {
            Coefficients::Flat(v) => v,
            Coefficients::Column(rows) => rows.into_iter().flatten().collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct CalibrationFile {
    camera_matrix: [[f64; 3]; 3],
    dist_coeffs: Coefficients,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraCalibration {
    pub camera_matrix: [[f64; 3]; 3],
    /// `[k1, k2, p1, p2, k3]`, missing trailing terms are zero.
    pub dist_coeffs: [f64; 5],
}

impl CameraCalibration {
    pub fn new(camera_matrix: [[f64; 3]; 3], dist_coeffs: &[f64]) -> Result<Self> {
        if dist_coeffs.len() > 5 {
            return Err(Error::InvalidConfig(format!(
                "at most 5 distortion coefficients supported, got {}",
                dist_coeffs.len()
            )));
        }

        let (fx, fy) = (camera_matrix[0][0], camera_matrix[1][1]);
        if !(fx.is_finite() && fy.is_finite()) || fx == 0.0 || fy == 0.0 {
            return Err(Error::InvalidConfig(
                "camera matrix has a zero focal length".into(),
            ));
        }

        let mut coeffs = [0.0; 5];
        coeffs[..dist_coeffs.len()].copy_from_slice(dist_coeffs);

        Ok(Self {
            camera_matrix,
            dist_coeffs: coeffs,
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        Self::parse(&content)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        let file: CalibrationFile = serde_yaml::from_str(yaml)?;

        Self::new(file.camera_matrix, &file.dist_coeffs.flatten())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = CalibrationFile {
            camera_matrix: self.camera_matrix,
            dist_coeffs: Coefficients::Flat(self.dist_coeffs.to_vec()),
        };

        std::fs::write(path, serde_yaml::to_string(&file)?)?;

        Ok(())
    }

    #[inline]
    fn intrinsics(&self) -> (f64, f64, f64, f64) {
        let k = &self.camera_matrix;
        (k[0][0], k[1][1], k[0][2], k[1][2])
    }

    #[inline]
    fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.dist_coeffs;
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));

        (
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Applies the lens model to an ideal pixel.
    pub fn distort_point(&self, p: Point2<f64>) -> Point2<f64> {
        let (fx, fy, cx, cy) = self.intrinsics();
        let (xd, yd) = self.distort_normalized((p.x - cx) / fx, (p.y - cy) / fy);

        Point2::new(xd * fx + cx, yd * fy + cy)
    }

    /// Removes lens distortion from a pixel, keeping the same camera matrix.
    ///
    /// Fixed-point inversion of the lens model; accurate for the moderate
    /// distortion of ordinary lenses.
    pub fn undistort_point(&self, p: Point2<f64>) -> Point2<f64> {
        let (fx, fy, cx, cy) = self.intrinsics();
        let [k1, k2, p1, p2, k3] = self.dist_coeffs;

        let xd = (p.x - cx) / fx;
        let yd = (p.y - cy) / fy;
        let (mut x, mut y) = (xd, yd);

        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

            x = (xd - dx) / radial;
            y = (yd - dy) / radial;
        }

        Point2::new(x * fx + cx, y * fy + cy)
    }
}
