use std::collections::VecDeque;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::Detection;
use crate::error::Result;
use crate::frame::Frame;

/// Source of per-frame detections. The pipeline never thresholds what it gets back.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
        }
    }
}

/// Wraps a raw detector with a confidence cut and non-maximum suppression.
pub struct DetectionFilter<D> {
    inner: D,
    config: DetectionConfig,
}

impl<D: Detector> DetectionFilter<D> {
    pub fn new(inner: D, config: DetectionConfig) -> Self {
        Self { inner, config }
    }
}

impl<D: Detector> Detector for DetectionFilter<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let raw = self.inner.detect(frame)?;
        let count = raw.len();

        let kept = non_maximum_suppression(
            raw,
            self.config.confidence_threshold,
            self.config.nms_threshold,
        );
        debug!(raw = count, kept = kept.len(), "detections filtered");

        Ok(kept)
    }
}

/// Drops detections not scoring above `confidence_threshold`, then greedily keeps the most
/// confident box of every group overlapping by more than `iou_threshold`.
///
/// Survivors come back in descending confidence order.
pub fn non_maximum_suppression(
    dets: Vec<Detection>,
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Vec<Detection> {
    let mut dets: Vec<_> = dets
        .into_iter()
        .filter(|d| d.confidence > confidence_threshold)
        .collect();

    dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut retain = vec![true; dets.len()];
    for idx in 0..dets.len() {
        if !retain[idx] {
            continue;
        }

        for other in idx + 1..dets.len() {
            if retain[other] && dets[idx].iou(&dets[other]) > iou_threshold {
                retain[other] = false;
            }
        }
    }

    dets.into_iter()
        .zip(retain)
        .filter_map(|(det, keep)| keep.then_some(det))
        .collect()
}

/// Serves pre-recorded detections, one batch per `detect` call, then nothing.
#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    batches: VecDeque<Vec<Detection>>,
}

impl ReplayDetector {
    pub fn new(batches: Vec<Vec<Detection>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    /// Reads a YAML list of per-frame detection lists.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let batches: Vec<Vec<Detection>> = serde_yaml::from_str(&content)?;

        Ok(Self::new(batches))
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;

    fn det(l: f32, t: f32, conf: f32) -> Detection {
        Detection::new(BBox::ltwh(l, t, 10.0, 10.0), conf, 2)
    }

    #[test]
    fn nms_keeps_best_of_overlapping_group() {
        let dets = vec![det(0.0, 0.0, 0.6), det(1.0, 0.0, 0.9), det(50.0, 50.0, 0.7)];
        let kept = non_maximum_suppression(dets, 0.5, 0.4);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn nms_keeps_only_scores_above_threshold() {
        let dets = vec![det(0.0, 0.0, 0.3), det(50.0, 50.0, 0.5), det(100.0, 100.0, 0.51)];
        let kept = non_maximum_suppression(dets, 0.5, 0.4);

        assert_eq!(kept, vec![det(100.0, 100.0, 0.51)]);
    }

    #[test]
    fn replay_then_empty() {
        let frame = Frame::filled(4, 4, 0, 0.0);
        let mut detector = ReplayDetector::new(vec![vec![det(0.0, 0.0, 1.0)], vec![]]);

        assert_eq!(detector.detect(&frame).unwrap().len(), 1);
        assert_eq!(detector.detect(&frame).unwrap().len(), 0);
        assert_eq!(detector.remaining(), 0);
        assert!(detector.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn filter_wraps_replay() {
        let frame = Frame::filled(4, 4, 0, 0.0);
        let replay = ReplayDetector::new(vec![vec![det(0.0, 0.0, 0.2), det(0.0, 0.0, 0.8)]]);
        let mut detector = DetectionFilter::new(replay, DetectionConfig::default());

        assert_eq!(detector.detect(&frame).unwrap(), vec![det(0.0, 0.0, 0.8)]);
    }

    #[test]
    fn replay_from_yaml() {
        let yaml = "- - bbox: [100, 100, 50, 50]\n    p: 0.9\n    c: 2\n- []\n";
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), yaml).unwrap();

        let mut detector = ReplayDetector::load_from(file.path()).unwrap();
        let frame = Frame::filled(4, 4, 0, 0.0);

        assert_eq!(
            detector.detect(&frame).unwrap(),
            vec![Detection::new(BBox::ltwh(100.0, 100.0, 50.0, 50.0), 0.9, 2)]
        );
        assert!(detector.detect(&frame).unwrap().is_empty());
    }
}
