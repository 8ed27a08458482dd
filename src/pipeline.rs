//! Per-frame orchestration: detections in, tracks with ground-plane speeds out.

use nalgebra as na;
use serde_derive::Serialize;
use tracing::{debug, info};

use crate::bbox::{BBox, Ltwh};
use crate::calibration::CameraCalibration;
use crate::config::Config;
use crate::detection::Detection;
use crate::detector::{DetectionFilter, Detector};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::homography::CoordinateMapper;
use crate::speed::SpeedEstimator;
use crate::store::TrackStore;
use crate::track::TrackId;
use crate::tracker::{TrackerFactory, TrackerSettings};

/// One live track as seen on one frame.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct TrackReport {
    pub track_id: TrackId,
    pub bbox: BBox<Ltwh>,
    pub speed: f64,
    /// Box center on the ground plane.
    pub position: [f64; 2],
    pub confidence: f32,
    pub class: i32,
}

pub struct Pipeline<D, F> {
    detector: D,
    store: TrackStore<F>,
    mapper: CoordinateMapper,
    estimator: SpeedEstimator,
    calibration: Option<CameraCalibration>,
    min_dt: f64,
    evict_lost: bool,
    last_timestamp: Option<f64>,
}

impl<D: Detector> Pipeline<DetectionFilter<D>, TrackerSettings> {
    /// Builds the whole pipeline from configuration. The mapper is left
    /// uninitialized when no homography points are configured.
    pub fn from_config(config: &Config, detector: D) -> Result<Self> {
        config.validate()?;

        let speed = &config.speed_estimation;
        let mut pipeline = Pipeline::new(
            DetectionFilter::new(detector, config.detection),
            config.tracking,
            CoordinateMapper::new(),
            SpeedEstimator::new(speed.smoothing_window, speed.conversion_factor)?,
        );
        pipeline.min_dt = speed.min_dt;
        pipeline.evict_lost = speed.evict_lost_tracks;

        let cal = &config.calibration;
        if !cal.homography_src_points.is_empty() {
            pipeline
                .mapper
                .compute(&cal.src_points(), &cal.dst_points())?;
        }

        if cal.undistort_centers {
            if let Some(path) = &cal.save_file {
                pipeline.calibration = Some(CameraCalibration::load_from(path)?);
            }
        }

        info!(
            tracker = ?config.tracking.kind,
            window = pipeline.estimator.window(),
            factor = pipeline.estimator.conversion_factor(),
            mapped = pipeline.mapper.is_initialized(),
            undistort = pipeline.calibration.is_some(),
            "pipeline ready"
        );

        Ok(pipeline)
    }
}

impl<D: Detector, F: TrackerFactory> Pipeline<D, F> {
    pub fn new(
        detector: D,
        factory: F,
        mapper: CoordinateMapper,
        estimator: SpeedEstimator,
    ) -> Self {
        Self {
            detector,
            store: TrackStore::new(factory),
            mapper,
            estimator,
            calibration: None,
            min_dt: 1e-3,
            evict_lost: false,
            last_timestamp: None,
        }
    }

    /// Undistort box centers with `calibration` before mapping them.
    pub fn with_calibration(mut self, calibration: CameraCalibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Replacement for non-positive or missing frame intervals.
    pub fn with_min_dt(mut self, min_dt: f64) -> Self {
        self.min_dt = min_dt;
        self
    }

    /// Drop a track's position history on the frame it is lost.
    pub fn with_eviction(mut self, evict: bool) -> Self {
        self.evict_lost = evict;
        self
    }

    #[inline]
    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    #[inline]
    pub fn mapper_mut(&mut self) -> &mut CoordinateMapper {
        &mut self.mapper
    }

    #[inline]
    pub fn store(&self) -> &TrackStore<F> {
        &self.store
    }

    #[inline]
    pub fn estimator(&self) -> &SpeedEstimator {
        &self.estimator
    }

    /// Runs the detector on `frame`, then [`Pipeline::step`].
    pub fn process(&mut self, frame: &Frame) -> Result<Vec<TrackReport>> {
        self.ensure_mapped()?;

        let detections = self.detector.detect(frame)?;

        self.step(frame, &detections)
    }

    /// Advances every track onto `frame`, starts tracks for `detections` and
    /// reports each live track with its current speed.
    ///
    /// Fails without touching any state when the mapper has no transform.
    pub fn step(&mut self, frame: &Frame, detections: &[Detection]) -> Result<Vec<TrackReport>> {
        self.ensure_mapped()?;

        let dt = self.update_time(frame.timestamp);
        let tracks = self.store.update(frame, detections);

        if self.evict_lost {
            for &id in self.store.lost() {
                if self.estimator.forget(id) {
                    debug!(track_id = id, "history evicted");
                }
            }
        }

        let centers: Vec<_> = tracks
            .iter()
            .map(|t| {
                let c = t.bbox.center();
                let c = na::Point2::new(c.x as f64, c.y as f64);

                match &self.calibration {
                    Some(cal) => cal.undistort_point(c),
                    None => c,
                }
            })
            .collect();

        let world = self.mapper.transform_points(&centers)?;

        let reports = tracks
            .iter()
            .zip(world)
            .map(|(t, pos)| TrackReport {
                track_id: t.track_id,
                bbox: t.bbox,
                speed: self.estimator.update_and_estimate(t.track_id, pos, dt),
                position: [pos.x, pos.y],
                confidence: t.confidence,
                class: t.class,
            })
            .collect();

        Ok(reports)
    }

    #[inline]
    fn ensure_mapped(&self) -> Result<()> {
        if self.mapper.is_initialized() {
            Ok(())
        } else {
            Err(Error::TransformNotInitialized)
        }
    }

    fn update_time(&mut self, timestamp: f64) -> f64 {
        let dt = match self.last_timestamp {
            Some(last) => timestamp - last,
            None => self.min_dt,
        };
        self.last_timestamp = Some(timestamp);

        if dt.is_finite() && dt > 0.0 {
            dt
        } else {
            debug!(dt, min_dt = self.min_dt, "frame interval clamped");
            self.min_dt
        }
    }
}
