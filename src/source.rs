//! Producers of detection frames.
//!
//! Capture and detection happen elsewhere; a source only yields what the
//! detector saw, one [`DetectionFrame`] per captured frame.

use std::io::BufRead;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::control_loop::FrameSender;
use crate::detection::{BoundingBox, DetectionFrame};

pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>>;
}

/// Replays detector output recorded as one JSON [`DetectionFrame`] per line.
pub struct JsonLinesSource<R> {
    reader: R,
    line_no: usize,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }
}

impl<R: BufRead> FrameSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let frame = serde_json::from_str(trimmed)
                .with_context(|| format!("bad detection frame on line {}", self.line_no))?;
            return Ok(Some(frame));
        }
    }
}

/// Synthetic subject walking back and forth across the frame.
///
/// Every `gap_every`-th frame reports no detection, the way a real detector
/// drops a face now and then.
pub struct SweepSource {
    width: i32,
    height: i32,
    size: u32,
    step: i32,
    x: i32,
    gap_every: Option<u64>,
    produced: u64,
}

impl SweepSource {
    pub fn new(width: i32, height: i32, size: u32, step: i32) -> Self {
        Self {
            width,
            height,
            size,
            step,
            x: 0,
            gap_every: None,
            produced: 0,
        }
    }

    pub fn with_gap_every(mut self, frames: u64) -> Self {
        self.gap_every = (frames > 0).then_some(frames);
        self
    }
}

impl FrameSource for SweepSource {
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>> {
        self.produced += 1;
        if self.gap_every.is_some_and(|n| self.produced % n == 0) {
            return Ok(Some(DetectionFrame::empty(self.width, self.height)));
        }

        let bbox = BoundingBox::new(self.x, (self.height - self.size as i32).max(0) / 2, self.size, self.size);
        let max_x = (self.width - self.size as i32).max(0);
        let next = self.x + self.step;
        if next < 0 || next > max_x {
            self.step = -self.step;
        }
        self.x = next.clamp(0, max_x);

        Ok(Some(DetectionFrame::new(self.width, self.height, vec![bbox])))
    }
}

/// Feed `source` into a running loop, one frame per `period`, until the source
/// runs dry, `limit` frames were sent or the loop stops. Returns frames sent.
pub fn pump(
    source: &mut dyn FrameSource,
    frames: &FrameSender,
    period: Duration,
    limit: Option<u64>,
) -> Result<u64> {
    let mut sent = 0;
    while limit.map_or(true, |limit| sent < limit) {
        let Some(frame) = source.next_frame()? else {
            info!("Frame source exhausted after {} frames", sent);
            break;
        };
        if frames.send(frame).is_err() {
            debug!("Control loop gone, producer exiting");
            break;
        }
        sent += 1;
        if !period.is_zero() {
            thread::sleep(period);
        }
    }
    Ok(sent)
}

/// [`pump`] on its own thread. The sender is dropped when the thread ends,
/// which lets the loop finish once nothing else holds one.
pub fn spawn_pump(
    mut source: Box<dyn FrameSource + Send>,
    frames: FrameSender,
    period: Duration,
    limit: Option<u64>,
) -> std::io::Result<JoinHandle<Result<u64>>> {
    thread::Builder::new()
        .name("servotrack-frames".into())
        .spawn(move || pump(&mut *source, &frames, period, limit))
}
