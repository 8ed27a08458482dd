//! YAML configuration.
//!
//! Every section is optional and falls back to its defaults:
//!
//! ```yaml
//! calibration:
//!   save_file: calibration.yaml
//!   undistort_centers: false
//!   homography_src_points: [[100, 200], [540, 200], [540, 380], [100, 380]]
//!   homography_dst_points: [[0, 0], [4, 0], [4, 3], [0, 3]]
//! detection:
//!   confidence_threshold: 0.5
//!   nms_threshold: 0.4
//! tracking:
//!   tracker_type: template
//!   search_radius: 16
//! speed_estimation:
//!   smoothing_window: 5
//!   conversion_factor: 3.6
//! logging:
//!   level: info
//! ```

use std::path::{Path, PathBuf};

use nalgebra::Point2;
use serde_derive::{Deserialize, Serialize};

use crate::detector::DetectionConfig;
use crate::error::{Error, Result};
use crate::tracker::TrackerSettings;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Camera matrix and distortion coefficients, see `CameraCalibration`.
    pub save_file: Option<PathBuf>,
    /// Undistort box centers before mapping them to the ground plane.
    pub undistort_centers: bool,
    pub homography_src_points: Vec<[f64; 2]>,
    pub homography_dst_points: Vec<[f64; 2]>,
}

impl CalibrationConfig {
    pub fn src_points(&self) -> Vec<Point2<f64>> {
        self.homography_src_points
            .iter()
            .map(|p| Point2::new(p[0], p[1]))
            .collect()
    }

    pub fn dst_points(&self) -> Vec<Point2<f64>> {
        self.homography_dst_points
            .iter()
            .map(|p| Point2::new(p[0], p[1]))
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SpeedConfig {
    /// Positions kept per track, at least 2.
    pub smoothing_window: usize,
    /// Multiplies world units per second, 3.6 turns m/s into km/h.
    pub conversion_factor: f64,
    /// Replacement for non-positive frame intervals, in seconds.
    pub min_dt: f64,
    /// Drop a track's position history as soon as the track is lost.
    pub evict_lost_tracks: bool,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            conversion_factor: 3.6,
            min_dt: 1e-3,
            evict_lost_tracks: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Also append log lines to this file.
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            log_file: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub calibration: CalibrationConfig,
    pub detection: DetectionConfig,
    pub tracking: TrackerSettings,
    pub speed_estimation: SpeedConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        Self::parse(&content)
    }

    /// Parses and validates a YAML document.
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let speed = &self.speed_estimation;
        if speed.smoothing_window < 2 {
            return Err(invalid(format!(
                "smoothing_window must be at least 2, got {}",
                speed.smoothing_window
            )));
        }

        if !(speed.conversion_factor.is_finite() && speed.conversion_factor > 0.0) {
            return Err(invalid(format!(
                "conversion_factor must be positive, got {}",
                speed.conversion_factor
            )));
        }

        if !(speed.min_dt.is_finite() && speed.min_dt > 0.0) {
            return Err(invalid(format!(
                "min_dt must be positive, got {}",
                speed.min_dt
            )));
        }

        let det = &self.detection;
        for (name, value) in [
            ("confidence_threshold", det.confidence_threshold),
            ("nms_threshold", det.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{} must lie in [0, 1], got {}", name, value)));
            }
        }

        let trk = &self.tracking;
        if !(trk.max_error.is_finite() && trk.max_error >= 0.0) {
            return Err(invalid(format!(
                "max_error must be non-negative, got {}",
                trk.max_error
            )));
        }

        if !(-1.0..=1.0).contains(&trk.min_correlation) {
            return Err(invalid(format!(
                "min_correlation must lie in [-1, 1], got {}",
                trk.min_correlation
            )));
        }

        let cal = &self.calibration;
        if cal.homography_src_points.len() != cal.homography_dst_points.len() {
            return Err(invalid(format!(
                "{} homography source points but {} destination points",
                cal.homography_src_points.len(),
                cal.homography_dst_points.len()
            )));
        }

        let count = cal.homography_src_points.len();
        if count > 0 && count < 4 {
            return Err(invalid(format!(
                "a homography needs at least 4 point pairs, got {}",
                count
            )));
        }

        if cal.undistort_centers && cal.save_file.is_none() {
            return Err(invalid(
                "undistort_centers needs a calibration save_file".into(),
            ));
        }

        Ok(())
    }
}

#[inline]
fn invalid(msg: String) -> Error {
    Error::InvalidConfig(msg)
}
