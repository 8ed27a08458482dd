use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltwh};

pub type TrackId = u64;

/// A live track as returned by `TrackStore::update`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Track {
    pub track_id: TrackId,
    pub bbox: BBox<Ltwh>,
    pub class: i32,
    pub confidence: f32,

    // frames since birth, 0 on the frame the track is created
    pub age: u32,
}
