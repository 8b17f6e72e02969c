// THEORY:
// Broadcast recordings carry material that is never play: the warm-up before the
// match, the ceremony after it, and the breaks between games. A `TrimPlan` marks
// those spans so the pipeline can treat them like a camera cut. It also maps
// original timestamps onto the trimmed timeline for callers that compile from a
// pre-trimmed file.

use crate::error::{RallyError, RallyResult};

/// Segment ends are sums of frame times, so they may miss a boundary by rounding.
const END_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct TrimPlan {
    match_start: f64,
    match_end: f64,
    /// Sorted, disjoint, clipped to the match.
    pauses: Vec<(f64, f64)>,
}

impl Default for TrimPlan {
    fn default() -> Self {
        Self {
            match_start: 0.0,
            match_end: f64::INFINITY,
            pauses: Vec::new(),
        }
    }
}

impl TrimPlan {
    pub fn new(
        match_start: Option<f64>,
        match_end: Option<f64>,
        pauses: &[(f64, f64)],
    ) -> RallyResult<Self> {
        let start = match_start.unwrap_or(0.0);
        let end = match_end.unwrap_or(f64::INFINITY);
        if !start.is_finite() || start < 0.0 {
            return Err(RallyError::configuration(
                "match_start",
                format!("must be a non-negative time, got {start}"),
            ));
        }
        if end.is_nan() || end <= start {
            return Err(RallyError::configuration(
                "match_end",
                format!("must be after match_start ({start}), got {end}"),
            ));
        }

        let mut sorted = Vec::with_capacity(pauses.len());
        for &(pause_start, pause_end) in pauses {
            if !pause_start.is_finite() || !pause_end.is_finite() || pause_start >= pause_end {
                return Err(RallyError::configuration(
                    "pauses",
                    format!("pause {pause_start}..{pause_end} must have start < end"),
                ));
            }
            let clipped = (pause_start.max(start), pause_end.min(end));
            if clipped.0 < clipped.1 {
                sorted.push(clipped);
            }
        }
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(sorted.len());
        for pause in sorted {
            match merged.last_mut() {
                Some(last) if pause.0 <= last.1 => last.1 = last.1.max(pause.1),
                _ => merged.push(pause),
            }
        }

        Ok(Self {
            match_start: start,
            match_end: end,
            pauses: merged,
        })
    }

    /// True when the plan keeps everything.
    pub fn is_identity(&self) -> bool {
        self.match_start == 0.0 && self.match_end.is_infinite() && self.pauses.is_empty()
    }

    pub fn is_kept(&self, timestamp: f64) -> bool {
        timestamp >= self.match_start
            && timestamp < self.match_end
            && !self.pauses.iter().any(|&(s, e)| timestamp >= s && timestamp < e)
    }

    /// Position of `timestamp` on the trimmed timeline, `None` if it was cut.
    pub fn map_timestamp(&self, timestamp: f64) -> Option<f64> {
        if !self.is_kept(timestamp) {
            return None;
        }
        let removed: f64 = self
            .pauses
            .iter()
            .filter(|&&(_, e)| e <= timestamp)
            .map(|&(s, e)| e - s)
            .sum();
        Some(timestamp - self.match_start - removed)
    }

    /// Like `map_timestamp`, for an exclusive end bound. An end that lands exactly on
    /// the start of a pause or on `match_end` closes a kept span, so it still maps.
    pub fn map_end(&self, timestamp: f64) -> Option<f64> {
        let kept = timestamp > self.match_start + END_TOLERANCE
            && timestamp <= self.match_end + END_TOLERANCE
            && !self
                .pauses
                .iter()
                .any(|&(s, e)| timestamp > s + END_TOLERANCE && timestamp <= e + END_TOLERANCE);
        if !kept {
            return None;
        }
        let removed: f64 = self
            .pauses
            .iter()
            .filter(|&&(_, e)| e < timestamp)
            .map(|&(s, e)| e - s)
            .sum();
        Some(timestamp - self.match_start - removed)
    }

    /// The spans of original time that survive, in order.
    pub fn kept_spans(&self) -> Vec<(f64, f64)> {
        let mut spans = Vec::with_capacity(self.pauses.len() + 1);
        let mut cursor = self.match_start;
        for &(s, e) in &self.pauses {
            if s > cursor {
                spans.push((cursor, s));
            }
            cursor = e;
        }
        if self.match_end > cursor {
            spans.push((cursor, self.match_end));
        }
        spans
    }
}
