use crate::detection::BoundingBox;

/// Pick the tracking target for this tick: the largest box by area, i.e. the
/// subject closest to the camera.
///
/// Equal areas resolve to the box that came first. Input order is whatever the
/// detector produced; nothing here assumes it is sorted.
pub fn select_target(detections: &[BoundingBox]) -> Option<BoundingBox> {
    let mut best: Option<&BoundingBox> = None;
    for bbox in detections {
        match best {
            Some(current) if bbox.area() <= current.area() => {}
            _ => best = Some(bbox),
        }
    }
    best.copied()
}
