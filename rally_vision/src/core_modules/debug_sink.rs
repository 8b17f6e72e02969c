// THEORY:
// Diagnostics are a side channel. The pipeline reports every classified frame and
// every closed provisional segment to a `DebugSink` and never reads anything back,
// so segmentation produces the same result with or without a sink attached.

use crate::core_modules::frame_classifier::FrameLabel;
use crate::core_modules::rally_state_machine::ProvisionalSegment;
use serde::{Deserialize, Serialize};

/// Everything known about one frame after it went through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameDebug {
    pub index: u64,
    pub timestamp: f64,
    pub label: FrameLabel,
    pub minimal_movement: bool,
    pub stability_score: f64,
    pub movement_score: f64,
    /// A rally was open after this frame was processed.
    pub rally_open: bool,
    pub low_movement_run: u32,
}

pub trait DebugSink {
    fn on_frame(&mut self, frame: &FrameDebug);

    fn on_segment_closed(&mut self, _segment: &ProvisionalSegment) {}
}

impl<T: DebugSink + ?Sized> DebugSink for &mut T {
    fn on_frame(&mut self, frame: &FrameDebug) {
        (**self).on_frame(frame)
    }

    fn on_segment_closed(&mut self, segment: &ProvisionalSegment) {
        (**self).on_segment_closed(segment)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DebugSink for NullSink {
    fn on_frame(&mut self, _frame: &FrameDebug) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub frames: Vec<FrameDebug>,
    pub segments: Vec<ProvisionalSegment>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DebugSink for RecordingSink {
    fn on_frame(&mut self, frame: &FrameDebug) {
        self.frames.push(*frame);
    }

    fn on_segment_closed(&mut self, segment: &ProvisionalSegment) {
        self.segments.push(*segment);
    }
}
