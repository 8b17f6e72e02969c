// THEORY:
// Tuning thresholds against a two-hour match is slow. An `AnalysisWindow` limits a
// run to one stretch of the video; samples outside it are skipped before they reach
// the classifier, so the state machine sees a shorter, self-contained stream.

use crate::error::{RallyError, RallyResult};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of the clip used for quick tuning runs, in seconds.
pub const DEFAULT_CLIP_SECONDS: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: f64,
    pub end: f64,
}

impl AnalysisWindow {
    pub fn new(start: f64, end: f64) -> RallyResult<Self> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
            return Err(RallyError::configuration(
                "window",
                format!("expected 0 <= start < end, got {start}..{end}"),
            ));
        }
        Ok(Self { start, end })
    }

    /// Half-open: `start <= t < end`.
    pub fn contains(&self, timestamp: f64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// A random `clip_len`-second window inside a video of `total_duration` seconds.
    /// Videos no longer than the clip are analysed whole.
    pub fn random_clip<R: Rng>(
        total_duration: f64,
        clip_len: f64,
        rng: &mut R,
    ) -> RallyResult<Self> {
        if !(clip_len > 0.0 && clip_len.is_finite()) {
            return Err(RallyError::configuration(
                "clip_len",
                format!("must be a positive number of seconds, got {clip_len}"),
            ));
        }
        if total_duration <= clip_len {
            return Self::new(0.0, total_duration.max(clip_len));
        }
        let latest_start = total_duration - clip_len;
        let start = rng.gen_range(0.0..=latest_start);
        Self::new(start, start + clip_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn window_is_half_open() {
        let window = AnalysisWindow::new(10.0, 20.0).unwrap();
        assert!(window.contains(10.0));
        assert!(window.contains(19.99));
        assert!(!window.contains(20.0));
        assert!(AnalysisWindow::new(20.0, 10.0).is_err());
    }

    #[test]
    fn random_clip_stays_inside_the_video() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let window =
                AnalysisWindow::random_clip(3600.0, DEFAULT_CLIP_SECONDS, &mut rng).unwrap();
            assert!(window.start >= 0.0);
            assert!(window.end <= 3600.0 + 1e-9);
            assert!((window.duration() - DEFAULT_CLIP_SECONDS).abs() < 1e-9);
        }
    }

    #[test]
    fn short_video_is_analysed_whole() {
        let mut rng = StdRng::seed_from_u64(1);
        let window = AnalysisWindow::random_clip(45.0, DEFAULT_CLIP_SECONDS, &mut rng).unwrap();
        assert_eq!(window.start, 0.0);
        assert!(window.contains(44.9));
    }
}
