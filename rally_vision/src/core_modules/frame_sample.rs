// THEORY:
// A `FrameSample` is the engine's view of one sampled frame after the pixels are
// gone: its position in the source video, its time, and the two scalar signals the
// extractor measured. Samples are cheap, `Copy`, and immutable. The `SamplingClock`
// is the single place that knows how frame numbers turn into seconds.

use crate::error::{RallyError, RallyResult};
use serde::{Deserialize, Serialize};

/// Every second frame of the original video is analysed unless told otherwise.
pub const DEFAULT_STRIDE: u32 = 2;

/// Maps original-video frame numbers to seconds for a fixed sampling stride.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingClock {
    fps: f64,
    stride: u32,
}

impl SamplingClock {
    pub fn new(fps: f64, stride: u32) -> RallyResult<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(RallyError::configuration(
                "fps",
                format!("must be a finite number greater than zero, got {fps}"),
            ));
        }
        if stride == 0 {
            return Err(RallyError::configuration("stride", "must be at least 1"));
        }
        Ok(Self { fps, stride })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Time in seconds of an original-video frame number.
    pub fn timestamp(&self, index: u64) -> f64 {
        index as f64 / self.fps
    }

    /// Seconds of video covered by one sample.
    pub fn sample_interval(&self) -> f64 {
        self.stride as f64 / self.fps
    }
}

/// The signals measured for a single sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    /// The original-video frame number of this sample.
    pub index: u64,
    /// Seconds from the start of the video.
    pub timestamp: f64,
    /// Template match confidence in [0, 1].
    pub stability_score: f64,
    /// Sum of absolute differences against the previous sample. Zero for the first sample.
    pub movement_score: f64,
}

impl FrameSample {
    pub fn new(
        index: u64,
        clock: &SamplingClock,
        stability_score: f64,
        movement_score: f64,
    ) -> Self {
        Self {
            index,
            timestamp: clock.timestamp(index),
            stability_score: stability_score.clamp(0.0, 1.0),
            movement_score: movement_score.max(0.0),
        }
    }
}

/// A rectangle, in pixels, restricting where the signals are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RegionOfInterest {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Scales the rectangle with the frame when frames are downscaled.
    pub fn scaled(&self, factor: f32) -> Self {
        let scale = |v: u32| (v as f32 * factor).round() as u32;
        Self {
            x: scale(self.x),
            y: scale(self.y),
            width: scale(self.width).max(1),
            height: scale(self.height).max(1),
        }
    }

    /// Intersects the rectangle with a frame. `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let clamped_width = self.width.min(width - self.x);
        let clamped_height = self.height.min(height - self.y);
        if clamped_width == 0 || clamped_height == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, clamped_width, clamped_height))
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_converts_frame_numbers_to_seconds() {
        let clock = SamplingClock::new(30.0, 2).unwrap();
        assert_eq!(clock.timestamp(0), 0.0);
        assert_eq!(clock.timestamp(60), 2.0);
        assert!((clock.sample_interval() - 2.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn clock_rejects_degenerate_rates() {
        assert!(SamplingClock::new(0.0, 1).is_err());
        assert!(SamplingClock::new(f64::NAN, 1).is_err());
        assert!(SamplingClock::new(25.0, 0).is_err());
    }

    #[test]
    fn sample_scores_are_kept_in_range() {
        let clock = SamplingClock::new(1.0, 1).unwrap();
        let sample = FrameSample::new(4, &clock, 1.7, -3.0);
        assert_eq!(sample.timestamp, 4.0);
        assert_eq!(sample.stability_score, 1.0);
        assert_eq!(sample.movement_score, 0.0);
    }

    #[test]
    fn region_is_clamped_to_the_frame() {
        let roi = RegionOfInterest::new(90, 40, 50, 50);
        assert_eq!(roi.clamp_to(100, 60), Some(RegionOfInterest::new(90, 40, 10, 20)));
        assert_eq!(roi.clamp_to(80, 60), None);
        assert_eq!(
            RegionOfInterest::new(10, 20, 30, 40).scaled(0.5),
            RegionOfInterest::new(5, 10, 15, 20)
        );
    }
}
