pub mod bbox;
pub mod calibration;
pub mod config;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod homography;
pub mod logger;
pub mod pipeline;
pub mod speed;
pub mod store;
pub mod tracker;

mod circular_queue;
mod track;

pub use bbox::{BBox, Ltwh};
pub use calibration::CameraCalibration;
pub use config::Config;
pub use detection::Detection;
pub use detector::{DetectionFilter, Detector, ReplayDetector};
pub use error::{Error, Result};
pub use frame::Frame;
pub use homography::{CoordinateMapper, Homography};
pub use pipeline::{Pipeline, TrackReport};
pub use speed::SpeedEstimator;
pub use store::TrackStore;
pub use track::{Track, TrackId};
pub use tracker::{TrackerFactory, TrackerKind, TrackerSettings, VisualTracker};
