// THEORY:
// Post-processing is a batch pass over every provisional segment of a run. It turns
// frame ranges into seconds and then cleans the list up in three fixed steps:
//   1. Merge neighbours whose gap is within `max_merge_gap`.
//   2. Drop anything shorter than `min_rally_duration`.
//   3. Split anything longer than `max_rally_duration` into equal pieces.
// Splitting keeps every second of content. The pieces share their boundaries
// exactly, so running the whole pass again merges them back and re-splits them
// into the same pieces: the pass is idempotent.

use crate::core_modules::frame_sample::SamplingClock;
use crate::core_modules::profile::ParameterProfile;
use crate::core_modules::rally_state_machine::ProvisionalSegment;
use log::debug;
use serde::Serialize;

/// Tolerance for comparing times, in seconds.
const EPSILON: f64 = 1e-9;

/// A final rally, in seconds. Always `start_time < end_time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RallySegment {
    start_time: f64,
    end_time: f64,
}

impl RallySegment {
    /// `None` unless both ends are finite and `start < end`.
    pub fn new(start_time: f64, end_time: f64) -> Option<Self> {
        if start_time.is_finite() && end_time.is_finite() && start_time < end_time {
            Some(Self { start_time, end_time })
        } else {
            None
        }
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Converts frame ranges to seconds. The end is exclusive: it covers the last sample.
pub fn to_rally_segments(
    provisional: &[ProvisionalSegment],
    clock: &SamplingClock,
) -> Vec<RallySegment> {
    provisional
        .iter()
        .filter_map(|segment| {
            RallySegment::new(
                clock.timestamp(segment.start_frame),
                clock.timestamp(segment.end_frame) + clock.sample_interval(),
            )
        })
        .collect()
}

pub fn merge_close_segments(mut segments: Vec<RallySegment>, max_gap: f64) -> Vec<RallySegment> {
    segments.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let mut merged: Vec<RallySegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(last) if segment.start_time - last.end_time <= max_gap + EPSILON => {
                last.end_time = last.end_time.max(segment.end_time);
            }
            _ => merged.push(segment),
        }
    }
    merged
}

pub fn drop_short_segments(segments: Vec<RallySegment>, min_duration: f64) -> Vec<RallySegment> {
    segments
        .into_iter()
        .filter(|segment| segment.duration() + EPSILON >= min_duration)
        .collect()
}

pub fn split_long_segments(segments: Vec<RallySegment>, max_duration: f64) -> Vec<RallySegment> {
    let mut result = Vec::with_capacity(segments.len());
    for segment in segments {
        let duration = segment.duration();
        if duration <= max_duration + EPSILON {
            result.push(segment);
            continue;
        }

        let pieces = (duration / max_duration).ceil() as usize;
        let boundary = |i: usize| {
            if i == pieces {
                segment.end_time
            } else {
                segment.start_time + duration * i as f64 / pieces as f64
            }
        };
        result.extend((0..pieces).filter_map(|i| RallySegment::new(boundary(i), boundary(i + 1))));
    }
    result
}

/// Merge, filter and split, in that order.
pub fn post_process(segments: Vec<RallySegment>, profile: &ParameterProfile) -> Vec<RallySegment> {
    let count = segments.len();
    let merged = merge_close_segments(segments, profile.max_merge_gap);
    let merged_count = merged.len();
    let kept = drop_short_segments(merged, profile.min_rally_duration);
    let kept_count = kept.len();
    let result = split_long_segments(kept, profile.max_rally_duration);
    debug!(
        "post-processing: {count} segment(s) -> {merged_count} merged -> \
         {kept_count} kept -> {} final",
        result.len()
    );
    result
}

/// Converts a run's provisional segments into the final rally list.
pub fn finalize(
    provisional: &[ProvisionalSegment],
    clock: &SamplingClock,
    profile: &ParameterProfile,
) -> Vec<RallySegment> {
    post_process(to_rally_segments(provisional, clock), profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::profile::MatchType;

    fn seg(start: f64, end: f64) -> RallySegment {
        RallySegment::new(start, end).unwrap()
    }

    fn profile(min: f64, max: f64, gap: f64) -> ParameterProfile {
        ParameterProfile {
            min_rally_duration: min,
            max_rally_duration: max,
            max_merge_gap: gap,
            ..ParameterProfile::builtin(MatchType::MenSingles)
        }
    }

    #[test]
    fn segment_requires_positive_length() {
        assert!(RallySegment::new(3.0, 3.0).is_none());
        assert!(RallySegment::new(4.0, 3.0).is_none());
        assert!(RallySegment::new(0.0, f64::INFINITY).is_none());
    }

    #[test]
    fn frame_ranges_cover_their_last_sample() {
        let clock = SamplingClock::new(30.0, 2).unwrap();
        let provisional = [ProvisionalSegment {
            start_frame: 30,
            end_frame: 88,
            contains_service_prep: false,
        }];
        let segments = to_rally_segments(&provisional, &clock);
        assert!((segments[0].start_time() - 1.0).abs() < 1e-12);
        assert!((segments[0].end_time() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn gap_equal_to_the_limit_merges() {
        let merged = merge_close_segments(vec![seg(0.0, 10.0), seg(18.0, 30.0)], 8.0);
        assert_eq!(merged, vec![seg(0.0, 30.0)]);

        let apart = merge_close_segments(vec![seg(0.0, 10.0), seg(19.0, 30.0)], 8.0);
        assert_eq!(apart.len(), 2);
    }

    #[test]
    fn merging_handles_unsorted_and_nested_input() {
        let unsorted = vec![seg(50.0, 60.0), seg(0.0, 20.0), seg(5.0, 10.0)];
        let merged = merge_close_segments(unsorted, 1.0);
        assert_eq!(merged, vec![seg(0.0, 20.0), seg(50.0, 60.0)]);
    }

    #[test]
    fn short_segments_are_dropped() {
        let kept = drop_short_segments(vec![seg(0.0, 7.9), seg(10.0, 18.0), seg(20.0, 40.0)], 8.0);
        assert_eq!(kept, vec![seg(10.0, 18.0), seg(20.0, 40.0)]);
    }

    #[test]
    fn long_segments_split_into_equal_pieces() {
        let pieces = split_long_segments(vec![seg(0.0, 250.0)], 120.0);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].start_time(), 0.0);
        assert_eq!(pieces[2].end_time(), 250.0);
        for window in pieces.windows(2) {
            assert_eq!(window[0].end_time(), window[1].start_time());
        }
        for piece in &pieces {
            assert!(piece.duration() <= 120.0);
            assert!((piece.duration() - 250.0 / 3.0).abs() < 1e-9);
        }

        let exact = split_long_segments(vec![seg(0.0, 120.0)], 120.0);
        assert_eq!(exact, vec![seg(0.0, 120.0)]);
    }

    #[test]
    fn output_is_sorted_disjoint_and_within_bounds() {
        let profile = profile(8.0, 120.0, 8.0);
        let input = vec![
            seg(300.0, 310.0),
            seg(0.0, 5.0),
            seg(10.0, 14.0),
            seg(40.0, 45.0),
            seg(100.0, 400.0),
            seg(600.0, 603.0),
        ];
        let output = post_process(input, &profile);
        assert!(!output.is_empty());
        for window in output.windows(2) {
            assert!(window[0].end_time() <= window[1].start_time());
        }
        for segment in &output {
            assert!(segment.duration() + 1e-9 >= profile.min_rally_duration);
            assert!(segment.duration() <= profile.max_rally_duration + 1e-9);
        }
    }

    #[test]
    fn post_processing_is_idempotent() {
        let profile = profile(8.0, 120.0, 8.0);
        let input = vec![
            seg(0.0, 5.0),
            seg(10.0, 14.0),
            seg(40.0, 45.0),
            seg(100.0, 400.0),
            seg(410.0, 430.0),
            seg(600.0, 603.0),
            seg(700.0, 1000.5),
        ];
        let once = post_process(input, &profile);
        let twice = post_process(once.clone(), &profile);
        assert_eq!(once, twice);
    }
}
