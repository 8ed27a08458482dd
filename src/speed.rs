use std::collections::HashMap;

use nalgebra as na;
use tracing::{debug, warn};

use crate::circular_queue::CircularQueue;
use crate::error::{Error, Result};
use crate::track::TrackId;

/// Keeps a bounded window of ground-plane positions per track and turns it
/// into a speed.
///
/// The speed is the straight-line distance between the oldest and the newest
/// retained point divided by `dt`, scaled by `conversion_factor`. Only the
/// two window endpoints are used; intermediate points do not smooth further.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    window: usize,
    conversion_factor: f64,
    positions: HashMap<TrackId, CircularQueue<na::Point2<f64>>>,
}

impl SpeedEstimator {
    /// `window` must be at least 2 and `conversion_factor` finite and positive.
    pub fn new(window: usize, conversion_factor: f64) -> Result<Self> {
        if window < 2 {
            return Err(Error::InvalidConfig(format!(
                "speed window must hold at least 2 positions, got {}",
                window
            )));
        }

        if !(conversion_factor.is_finite() && conversion_factor > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "conversion factor must be positive, got {}",
                conversion_factor
            )));
        }

        Ok(Self {
            window,
            conversion_factor,
            positions: HashMap::new(),
        })
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    #[inline]
    pub fn conversion_factor(&self) -> f64 {
        self.conversion_factor
    }

    /// Non-finite positions (a point on the horizon line) are dropped.
    pub fn update_position(&mut self, id: TrackId, pos: na::Point2<f64>) {
        if !(pos.x.is_finite() && pos.y.is_finite()) {
            warn!(track_id = id, x = pos.x, y = pos.y, "non-finite position ignored");
            return;
        }

        let window = self.window;
        let history = self
            .positions
            .entry(id)
            .or_insert_with(|| CircularQueue::with_capacity(window));

        if let Some(evicted) = history.push(pos) {
            debug!(track_id = id, x = evicted.x, y = evicted.y, "position left window");
        }
    }

    /// Speed in the configured unit, `0.0` while fewer than two positions are known.
    ///
    /// `dt` must be strictly positive; the pipeline clamps it before calling.
    pub fn estimate_speed(&self, id: TrackId, dt: f64) -> f64 {
        let history = match self.positions.get(&id) {
            Some(history) if history.len() >= 2 => history,
            _ => return 0.0,
        };

        let (oldest, newest) = match (history.oldest(), history.newest()) {
            (Some(oldest), Some(newest)) => (oldest, newest),
            _ => return 0.0,
        };

        let dl = na::distance(oldest, newest);

        dl / dt * self.conversion_factor
    }

    #[inline]
    pub fn update_and_estimate(&mut self, id: TrackId, pos: na::Point2<f64>, dt: f64) -> f64 {
        self.update_position(id, pos);
        self.estimate_speed(id, dt)
    }

    /// Retained positions for `id`, oldest first.
    pub fn history(&self, id: TrackId) -> Vec<na::Point2<f64>> {
        self.positions
            .get(&id)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drops the history of `id`. Returns whether there was one.
    pub fn forget(&mut self, id: TrackId) -> bool {
        self.positions.remove(&id).is_some()
    }

    #[inline]
    pub fn tracked_ids(&self) -> usize {
        self.positions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn insufficient_history_gives_zero() {
        let mut est = SpeedEstimator::new(3, 3.6).unwrap();
        assert_eq!(est.estimate_speed(0, 1.0), 0.0);

        est.update_position(0, na::Point2::new(0.0, 0.0));
        assert_eq!(est.estimate_speed(0, 1.0), 0.0);
        assert_eq!(est.estimate_speed(0, 1e-9), 0.0);
        assert_eq!(est.estimate_speed(7, 1.0), 0.0);
    }

    #[test]
    fn three_four_five_triangle() {
        let mut est = SpeedEstimator::new(3, 3.6).unwrap();
        est.update_position(0, na::Point2::new(0.0, 0.0));
        est.update_position(0, na::Point2::new(3.0, 4.0));

        assert_abs_diff_eq!(est.estimate_speed(0, 1.0), 18.0, epsilon = 1e-6);
        assert_abs_diff_eq!(est.estimate_speed(0, 0.5), 36.0, epsilon = 1e-6);
    }

    #[test]
    fn uses_window_endpoints_only() {
        let mut est = SpeedEstimator::new(3, 1.0).unwrap();
        est.update_position(1, na::Point2::new(0.0, 0.0));
        est.update_position(1, na::Point2::new(100.0, 100.0));
        est.update_position(1, na::Point2::new(0.0, 2.0));

        assert_abs_diff_eq!(est.estimate_speed(1, 1.0), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn window_retains_most_recent_points() {
        let w = 4;
        let mut est = SpeedEstimator::new(w, 1.0).unwrap();

        for k in 0..(w + 3) {
            est.update_position(5, na::Point2::new(k as f64, 0.0));
            assert!(est.history(5).len() <= w);
        }

        let xs: Vec<f64> = est.history(5).iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![3.0, 4.0, 5.0, 6.0]);
        assert_abs_diff_eq!(est.estimate_speed(5, 1.0), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn histories_are_independent_and_forgettable() {
        let mut est = SpeedEstimator::new(2, 1.0).unwrap();
        est.update_position(0, na::Point2::new(0.0, 0.0));
        est.update_position(1, na::Point2::new(10.0, 0.0));
        est.update_position(0, na::Point2::new(1.0, 0.0));

        assert_abs_diff_eq!(est.estimate_speed(0, 1.0), 1.0, epsilon = 1e-9);
        assert_eq!(est.estimate_speed(1, 1.0), 0.0);
        assert_eq!(est.tracked_ids(), 2);

        assert!(est.forget(0));
        assert!(!est.forget(0));
        assert_eq!(est.estimate_speed(0, 1.0), 0.0);
    }

    #[test]
    fn rejects_bad_parameters() {
        for (window, factor) in [(0, 1.0), (1, 1.0), (3, 0.0), (3, -3.6), (3, f64::NAN)] {
            assert!(matches!(
                SpeedEstimator::new(window, factor),
                Err(Error::InvalidConfig(_))
            ));
        }
        assert_eq!(SpeedEstimator::new(2, 1.0).unwrap().window(), 2);
    }

    #[test]
    fn non_finite_positions_are_skipped() {
        let mut est = SpeedEstimator::new(3, 1.0).unwrap();
        est.update_position(0, na::Point2::new(0.0, 0.0));
        est.update_position(0, na::Point2::new(f64::INFINITY, f64::INFINITY));
        est.update_position(0, na::Point2::new(f64::NAN, 1.0));

        assert_eq!(est.history(0).len(), 1);
        assert_eq!(est.estimate_speed(0, 1.0), 0.0);

        est.update_position(0, na::Point2::new(3.0, 4.0));
        assert_abs_diff_eq!(est.estimate_speed(0, 1.0), 5.0, epsilon = 1e-9);
    }
}
