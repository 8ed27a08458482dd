use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::bbox::{BBox, Ltwh};
use crate::detection::Detection;
use crate::frame::Frame;
use crate::track::{Track, TrackId};
use crate::tracker::{TrackerFactory, VisualTracker};

// a newborn track overlapping a live one this much is most likely the same object
const DUPLICATE_IOU: f32 = 0.5;

#[derive(Debug)]
struct Entry {
    tracker: Box<dyn VisualTracker>,
    bbox: BBox<Ltwh>,
    class: i32,
    confidence: f32,
    age: u32,
}

impl Entry {
    #[inline]
    fn track(&self, id: TrackId) -> Track {
        Track {
            track_id: id,
            bbox: self.bbox,
            class: self.class,
            confidence: self.confidence,
            age: self.age,
        }
    }
}

/// Owns the live tracks and their visual trackers.
///
/// Every detection handed to [`TrackStore::update`] starts a new track; no
/// attempt is made to match it against live tracks, so an object detected on
/// consecutive frames gets a fresh id each time. Identities come from a
/// per-store counter and are never reused.
pub struct TrackStore<F> {
    factory: F,
    next_id: TrackId,
    entries: BTreeMap<TrackId, Entry>,
    lost: Vec<TrackId>,
}

impl<F: TrackerFactory> TrackStore<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            next_id: 0,
            entries: BTreeMap::new(),
            lost: Vec::new(),
        }
    }

    /// Advances every live track onto `frame`, drops the ones whose tracker
    /// failed, then starts one track per detection.
    ///
    /// Surviving tracks come first in ascending id order, followed by the new
    /// tracks in detection order. Detection boxes are not validated.
    pub fn update(&mut self, frame: &Frame, detections: &[Detection]) -> Vec<Track> {
        self.lost.clear();

        let mut tracks = Vec::with_capacity(self.entries.len() + detections.len());

        for (&id, entry) in self.entries.iter_mut() {
            match entry.tracker.update(frame) {
                Some(bbox) => {
                    entry.bbox = bbox;
                    entry.age += 1;
                    tracks.push(entry.track(id));
                }
                None => self.lost.push(id),
            }
        }

        for id in &self.lost {
            if let Some(entry) = self.entries.remove(id) {
                debug!(track_id = id, age = entry.age, "track lost");
            }
        }

        for det in detections {
            if det.bbox.is_degenerate() {
                warn!(bbox = ?det.bbox.as_slice(), "degenerate detection box");
            }

            let id = self.next_id;
            self.next_id += 1;

            if let Some(twin) = tracks
                .iter()
                .find(|t| t.bbox.iou(&det.bbox) > DUPLICATE_IOU)
            {
                debug!(track_id = id, twin = twin.track_id, "new track overlaps a live one");
            }

            let mut tracker = self.factory.create();
            tracker.init(frame, det.bbox);

            let entry = Entry {
                tracker,
                bbox: det.bbox,
                class: det.class,
                confidence: det.confidence,
                age: 0,
            };

            debug!(track_id = id, bbox = ?det.bbox.as_slice(), "track born");
            tracks.push(entry.track(id));
            self.entries.insert(id, entry);
        }

        tracks
    }

    /// Ids removed by the last `update`, ascending.
    #[inline]
    pub fn lost(&self) -> &[TrackId] {
        &self.lost
    }

    /// The id the next new track will receive.
    #[inline]
    pub fn next_id(&self) -> TrackId {
        self.next_id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: TrackId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Live tracks in ascending id order, as of the last `update`.
    pub fn tracks(&self) -> Vec<Track> {
        self.entries
            .iter()
            .map(|(&id, entry)| entry.track(id))
            .collect()
    }
}
