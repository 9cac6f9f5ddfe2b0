use serde::{Deserialize, Serialize};

/// A single detection as delivered by the external detector: top-left corner plus size, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// Horizontal center, rounded down the way the detector pipeline reports it.
    pub fn center_x(&self) -> i64 {
        self.x as i64 + (self.w / 2) as i64
    }

    pub fn center_y(&self) -> i64 {
        self.y as i64 + (self.h / 2) as i64
    }
}

/// Everything the control loop needs from one captured frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub detections: Vec<BoundingBox>,
}

impl DetectionFrame {
    pub fn new(width: i32, height: i32, detections: Vec<BoundingBox>) -> Self {
        Self {
            width,
            height,
            detections,
        }
    }

    /// A frame in which the detector found nothing.
    pub fn empty(width: i32, height: i32) -> Self {
        Self::new(width, height, Vec::new())
    }
}
