//! Single-object visual trackers.
//!
//! A [`VisualTracker`] follows one box from frame to frame without fresh
//! detections. The track store owns exactly one tracker per live track and
//! obtains new ones through a [`TrackerFactory`]. [`TrackerKind`] is the
//! closed set of built-in implementations, picked once from configuration.

use std::fmt;

use ndarray::{s, Array2, ArrayView2};
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltwh};
use crate::frame::Frame;

// patches narrower or shorter than this carry too little signal to search for
const MIN_PATCH: i64 = 2;

pub trait VisualTracker: fmt::Debug {
    /// Binds the tracker to `bbox` on `frame`. A box that does not overlap the
    /// frame leaves the tracker unbound, and its first `update` reports failure.
    fn init(&mut self, frame: &Frame, bbox: BBox<Ltwh>);

    /// Advances the box onto `frame`; `None` means the target is lost.
    fn update(&mut self, frame: &Frame) -> Option<BBox<Ltwh>>;
}

pub trait TrackerFactory {
    fn create(&self) -> Box<dyn VisualTracker>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    /// Sum of squared differences against the last matched patch.
    #[default]
    Template,
    /// Zero-mean normalized cross-correlation, tolerant to brightness changes.
    Correlation,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct TrackerSettings {
    #[serde(rename = "tracker_type")]
    pub kind: TrackerKind,
    /// Largest per-frame displacement searched, in pixels.
    pub search_radius: u32,
    /// Template tracker: mean squared error ceiling, normalized to `[0, 1]`.
    pub max_error: f32,
    /// Correlation tracker: lowest acceptable correlation, in `[-1, 1]`.
    pub min_correlation: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            kind: TrackerKind::Template,
            search_radius: 16,
            max_error: 0.05,
            min_correlation: 0.6,
        }
    }
}

impl TrackerFactory for TrackerSettings {
    fn create(&self) -> Box<dyn VisualTracker> {
        match self.kind {
            TrackerKind::Template => {
                Box::new(TemplateTracker::new(self.search_radius, self.max_error))
            }
            TrackerKind::Correlation => Box::new(CorrelationTracker::new(
                self.search_radius,
                self.min_correlation,
            )),
        }
    }
}

/// Integer pixel rectangle lying inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    x: i64,
    y: i64,
    w: i64,
    h: i64,
}

impl Region {
    fn clipped(bbox: &BBox<Ltwh>, frame: &Frame) -> Option<Self> {
        let ltrb = bbox.as_ltrb();
        let l = (ltrb.left().round() as i64).max(0);
        let t = (ltrb.top().round() as i64).max(0);
        let r = (ltrb.right().round() as i64).min(frame.width() as i64);
        let b = (ltrb.bottom().round() as i64).min(frame.height() as i64);

        if r - l < MIN_PATCH || b - t < MIN_PATCH {
            return None;
        }

        Some(Self {
            x: l,
            y: t,
            w: r - l,
            h: b - t,
        })
    }

    #[inline]
    fn shifted(&self, dx: i64, dy: i64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    #[inline]
    fn fits(&self, frame: &Frame) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.x + self.w <= frame.width() as i64
            && self.y + self.h <= frame.height() as i64
    }

    #[inline]
    fn view<'a>(&self, frame: &'a Frame) -> ArrayView2<'a, u8> {
        let (x, y, w, h) = (
            self.x as usize,
            self.y as usize,
            self.w as usize,
            self.h as usize,
        );

        frame.image.slice(s![y..y + h, x..x + w])
    }

    #[inline]
    fn patch(&self, frame: &Frame) -> Array2<f32> {
        self.view(frame).mapv(f32::from)
    }
}

/// What a bound tracker remembers between frames.
#[derive(Debug, Clone)]
struct Target {
    bbox: BBox<Ltwh>,
    region: Region,
}

/// Exhaustive search over `[-radius, radius]^2` offsets of `region`.
///
/// `cost` returns `None` for candidates it cannot score. Lower cost wins,
/// ties go to the smaller displacement.
fn search<C>(frame: &Frame, region: Region, radius: i64, cost: C) -> Option<(i64, i64, f32)>
where
    C: Fn(ArrayView2<'_, u8>) -> Option<f32>,
{
    let mut best: Option<(i64, i64, f32)> = None;

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let candidate = region.shifted(dx, dy);
            if !candidate.fits(frame) {
                continue;
            }

            let c = match cost(candidate.view(frame)) {
                Some(c) if c.is_finite() => c,
                _ => continue,
            };

            let better = match best {
                None => true,
                Some((bx, by, bc)) => {
                    c < bc || (c == bc && dx * dx + dy * dy < bx * bx + by * by)
                }
            };

            if better {
                best = Some((dx, dy, c));
            }
        }
    }

    best
}

/// Tracks by minimizing the mean squared pixel difference to a template.
///
/// The template is refreshed from every successful match.
#[derive(Debug, Clone)]
pub struct TemplateTracker {
    search_radius: i64,
    max_error: f32,
    target: Option<Target>,
    template: Array2<f32>,
}

impl TemplateTracker {
    pub fn new(search_radius: u32, max_error: f32) -> Self {
        Self {
            search_radius: search_radius as i64,
            max_error,
            target: None,
            template: Array2::zeros((0, 0)),
        }
    }
}

impl VisualTracker for TemplateTracker {
    fn init(&mut self, frame: &Frame, bbox: BBox<Ltwh>) {
        self.target = None;

        if let Some(region) = Region::clipped(&bbox, frame) {
            self.template = region.patch(frame);
            self.target = Some(Target { bbox, region });
        }
    }

    fn update(&mut self, frame: &Frame) -> Option<BBox<Ltwh>> {
        let target = self.target.as_ref()?;
        let template = &self.template;
        let norm = 255.0f32 * 255.0 * template.len() as f32;

        let found = search(frame, target.region, self.search_radius, |view| {
            let ssd: f32 = template
                .iter()
                .zip(view.iter())
                .map(|(&t, &p)| {
                    let d = t - f32::from(p);
                    d * d
                })
                .sum();

            Some(ssd / norm)
        });

        match found {
            Some((dx, dy, err)) if err <= self.max_error => {
                let region = target.region.shifted(dx, dy);
                let bbox = target.bbox.shifted(dx as f32, dy as f32);

                self.template = region.patch(frame);
                self.target = Some(Target { bbox, region });

                Some(bbox)
            }
            _ => {
                self.target = None;
                None
            }
        }
    }
}

/// Tracks by maximizing zero-mean normalized cross-correlation with the
/// patch captured at `init`.
///
/// A textureless patch has no defined correlation, so binding to one
/// leaves the tracker lost.
#[derive(Debug, Clone)]
pub struct CorrelationTracker {
    search_radius: i64,
    min_correlation: f32,
    target: Option<Target>,
    // zero-mean template and its L2 norm
    template: Array2<f32>,
    template_norm: f32,
}

impl CorrelationTracker {
    pub fn new(search_radius: u32, min_correlation: f32) -> Self {
        Self {
            search_radius: search_radius as i64,
            min_correlation,
            target: None,
            template: Array2::zeros((0, 0)),
            template_norm: 0.0,
        }
    }
}

impl VisualTracker for CorrelationTracker {
    fn init(&mut self, frame: &Frame, bbox: BBox<Ltwh>) {
        self.target = None;

        if let Some(region) = Region::clipped(&bbox, frame) {
            let patch = region.patch(frame);
            let mean = patch.mean().unwrap_or(0.0);
            let centered = patch.mapv(|v| v - mean);
            let norm = centered.iter().map(|v| v * v).sum::<f32>().sqrt();

            if norm > f32::EPSILON {
                self.template = centered;
                self.template_norm = norm;
                self.target = Some(Target { bbox, region });
            }
        }
    }

    fn update(&mut self, frame: &Frame) -> Option<BBox<Ltwh>> {
        let target = self.target.as_ref()?;
        let template = &self.template;
        let template_norm = self.template_norm;
        let n = template.len() as f32;

        let found = search(frame, target.region, self.search_radius, |view| {
            let mean = view.iter().map(|&p| f32::from(p)).sum::<f32>() / n;

            let mut dot = 0.0f32;
            let mut sq = 0.0f32;
            for (&t, &p) in template.iter().zip(view.iter()) {
                let c = f32::from(p) - mean;
                dot += t * c;
                sq += c * c;
            }

            let norm = sq.sqrt();
            if norm <= f32::EPSILON {
                return None;
            }

            Some(1.0 - dot / (template_norm * norm))
        });

        match found {
            Some((dx, dy, cost)) if 1.0 - cost >= self.min_correlation => {
                let region = target.region.shifted(dx, dy);
                let bbox = target.bbox.shifted(dx as f32, dy as f32);
                self.target = Some(Target { bbox, region });

                Some(bbox)
            }
            _ => {
                self.target = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // dark frame with a textured bright square at (x, y)
    fn square_frame(x: usize, y: usize, size: usize) -> Frame {
        let mut frame = Frame::filled(320, 240, 20, 0.0);
        for r in 0..size {
            for c in 0..size {
                frame.image[(y + r, x + c)] = (100 + (c * 2 + r) % 100) as u8;
            }
        }
        frame
    }

    fn follows_moving_square(kind: TrackerKind) {
        let settings = TrackerSettings {
            kind,
            ..Default::default()
        };
        let mut tracker = settings.create();

        // a margin of background around the square
        tracker.init(&square_frame(100, 100, 40), BBox::ltwh(95.0, 95.0, 50.0, 50.0));

        let b1 = tracker.update(&square_frame(103, 101, 40));
        assert_eq!(b1, Some(BBox::ltwh(98.0, 96.0, 50.0, 50.0)));

        let b2 = tracker.update(&square_frame(106, 101, 40));
        assert_eq!(b2, Some(BBox::ltwh(101.0, 96.0, 50.0, 50.0)));
    }

    #[test]
    fn template_follows_moving_square() {
        follows_moving_square(TrackerKind::Template);
    }

    #[test]
    fn correlation_follows_moving_square() {
        follows_moving_square(TrackerKind::Correlation);
    }

    #[test]
    fn loses_target_that_vanishes() {
        for kind in [TrackerKind::Template, TrackerKind::Correlation] {
            let mut tracker = TrackerSettings {
                kind,
                max_error: 0.01,
                ..Default::default()
            }
            .create();

            tracker.init(&square_frame(100, 100, 40), BBox::ltwh(95.0, 95.0, 50.0, 50.0));
            assert_eq!(tracker.update(&Frame::filled(320, 240, 20, 0.04)), None);
            // stays lost
            assert_eq!(tracker.update(&square_frame(100, 100, 40)), None);
        }
    }

    #[test]
    fn box_outside_frame_is_lost_immediately() {
        let frame = square_frame(100, 100, 40);
        let mut tracker = TemplateTracker::new(8, 0.05);

        tracker.init(&frame, BBox::ltwh(1000.0, 1000.0, 50.0, 50.0));
        assert_eq!(tracker.update(&frame), None);

        tracker.init(&frame, BBox::ltwh(100.0, 100.0, -50.0, 50.0));
        assert_eq!(tracker.update(&frame), None);
    }

    #[test]
    fn flat_patch_cannot_be_correlated() {
        let frame = Frame::filled(64, 64, 50, 0.0);
        let mut tracker = CorrelationTracker::new(4, 0.5);

        tracker.init(&frame, BBox::ltwh(10.0, 10.0, 20.0, 20.0));
        assert_eq!(tracker.update(&frame), None);
    }

    #[test]
    fn static_scene_keeps_box() {
        let frame = square_frame(10, 10, 20);
        let mut tracker = TemplateTracker::new(2, 0.05);

        tracker.init(&frame, BBox::ltwh(5.0, 5.0, 30.0, 30.0));
        assert_eq!(tracker.update(&frame), Some(BBox::ltwh(5.0, 5.0, 30.0, 30.0)));
        assert_eq!(tracker.update(&frame), Some(BBox::ltwh(5.0, 5.0, 30.0, 30.0)));
    }

    #[test]
    fn tracker_kind_from_yaml() {
        let s: TrackerSettings = serde_yaml::from_str("tracker_type: correlation").unwrap();
        assert_eq!(s.kind, TrackerKind::Correlation);
        assert_eq!(s.search_radius, 16);
    }
}
