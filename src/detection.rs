use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltwh};

/// One detector output: a box in (left, top, width, height) image pixels
/// plus the detector's confidence and class label.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BBox<Ltwh>,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: i32,
}

impl Detection {
    #[inline]
    pub fn new(bbox: BBox<Ltwh>, confidence: f32, class: i32) -> Self {
        Self {
            bbox,
            confidence,
            class,
        }
    }

    /// A detection with full confidence and no class, handy when only the box matters.
    #[inline]
    pub fn from_box(bbox: BBox<Ltwh>) -> Self {
        Self::new(bbox, 1.0, -1)
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.bbox.iou(&other.bbox)
    }
}
