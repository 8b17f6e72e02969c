// THEORY:
// The `RallyStateMachine` is a fold over the classified frame stream. It is the only
// stateful part of segmentation and it knows nothing about pixels or seconds: it
// sees (frame index, label) pairs in increasing index order and emits provisional
// segments as frame ranges.
//
// Two states matter:
//   - Idle: no rally is open. Frames are only remembered in the lookback buffer.
//   - PrepOrActive: a rally is open. It may currently be in a low-movement lull.
// "Closed" is not a resting state; closing emits a segment and returns to Idle in
// the same step.
//
// Service preparation has no state of its own. It is handled by two mechanisms:
//   1. Backdating: when an ACTIVE frame opens a rally, the start is pulled back
//      through the lookback buffer over the stable frames that preceded it, stopping
//      at the first UNSTABLE frame or at the end of the previous emitted segment.
//   2. Tolerance: an open rally survives up to `allowed_low_movement_frames`
//      consecutive LOW_MOVEMENT frames. One more closes it.
//
// A rally always closes at its last ACTIVE frame, never at the lull or cut that
// ended it. Segments whose ACTIVE span (trigger to last ACTIVE frame, in samples)
// is shorter than `min_segment_frames` are dropped here, before any merging.

use crate::core_modules::frame_classifier::FrameLabel;
use crate::core_modules::profile::ParameterProfile;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RallyState {
    Idle,
    PrepOrActive,
}

/// A rally as a closed range of original-video frame numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalSegment {
    pub start_frame: u64,
    pub end_frame: u64,
    /// The segment includes low-movement frames, either backdated before the
    /// triggering spike or a lull the rally recovered from.
    pub contains_service_prep: bool,
}

#[derive(Debug, Clone, Copy)]
struct OpenRally {
    start_frame: u64,
    trigger_ordinal: u64,
    last_active_frame: u64,
    last_active_ordinal: u64,
    end_frame: u64,
    contains_service_prep: bool,
}

impl OpenRally {
    fn active_span(&self) -> u64 {
        self.last_active_ordinal - self.trigger_ordinal + 1
    }
}

pub struct RallyStateMachine {
    lookback_size: usize,
    allowed_low_movement_frames: u32,
    min_segment_frames: u32,
    /// The most recent frames before the current one, oldest first.
    lookback: VecDeque<(u64, FrameLabel)>,
    open: Option<OpenRally>,
    low_movement_run: u32,
    /// End of the last emitted segment. Backdating never reaches at or before it.
    last_emitted_end: Option<u64>,
    /// Number of frames stepped so far.
    ordinal: u64,
}

impl RallyStateMachine {
    pub fn new(profile: &ParameterProfile) -> Self {
        Self {
            lookback_size: profile.lookback_size,
            allowed_low_movement_frames: profile.allowed_low_movement_frames,
            min_segment_frames: profile.min_segment_frames,
            lookback: VecDeque::with_capacity(profile.lookback_size),
            open: None,
            low_movement_run: 0,
            last_emitted_end: None,
            ordinal: 0,
        }
    }

    pub fn state(&self) -> RallyState {
        if self.open.is_some() {
            RallyState::PrepOrActive
        } else {
            RallyState::Idle
        }
    }

    /// Consecutive LOW_MOVEMENT frames inside the open rally.
    pub fn low_movement_run(&self) -> u32 {
        self.low_movement_run
    }

    /// The rally currently open, as it would look if closed now.
    pub fn open_segment(&self) -> Option<ProvisionalSegment> {
        self.open.map(|rally| ProvisionalSegment {
            start_frame: rally.start_frame,
            end_frame: rally.end_frame,
            contains_service_prep: rally.contains_service_prep,
        })
    }

    /// Feeds one classified frame. Returns a segment when this frame closed one.
    pub fn step(&mut self, index: u64, label: FrameLabel) -> Option<ProvisionalSegment> {
        let ordinal = self.ordinal;
        self.ordinal += 1;

        let closed = match (self.open.as_mut(), label) {
            (None, FrameLabel::Active) => {
                let start_frame = self.backdated_start(index);
                debug!("rally opened at frame {index}, backdated to {start_frame}");
                self.open = Some(OpenRally {
                    start_frame,
                    trigger_ordinal: ordinal,
                    last_active_frame: index,
                    last_active_ordinal: ordinal,
                    end_frame: index,
                    contains_service_prep: start_frame < index,
                });
                self.low_movement_run = 0;
                None
            }
            (None, _) => None,
            (Some(rally), FrameLabel::Active) => {
                if self.low_movement_run > 0 {
                    rally.contains_service_prep = true;
                }
                rally.end_frame = index;
                rally.last_active_frame = index;
                rally.last_active_ordinal = ordinal;
                self.low_movement_run = 0;
                None
            }
            (Some(rally), FrameLabel::LowMovement) => {
                self.low_movement_run += 1;
                rally.end_frame = index;
                if self.low_movement_run > self.allowed_low_movement_frames {
                    debug!("rally closed by a low-movement run at frame {index}");
                    self.close()
                } else {
                    None
                }
            }
            (Some(_), FrameLabel::Unstable) => {
                debug!("rally closed by an unstable frame at frame {index}");
                self.close()
            }
        };

        self.remember(index, label);
        closed
    }

    /// Ends the stream, closing any open rally at its last ACTIVE frame.
    pub fn finish(&mut self) -> Option<ProvisionalSegment> {
        self.close()
    }

    fn backdated_start(&self, index: u64) -> u64 {
        let mut start = index;
        for &(frame, label) in self.lookback.iter().rev() {
            if label == FrameLabel::Unstable {
                break;
            }
            if self.last_emitted_end.is_some_and(|end| frame <= end) {
                break;
            }
            start = frame;
        }
        start
    }

    fn close(&mut self) -> Option<ProvisionalSegment> {
        let rally = self.open.take()?;
        self.low_movement_run = 0;

        if rally.active_span() < self.min_segment_frames as u64 {
            debug!(
                "discarding rally at frames {}..={}: {} active sample(s)",
                rally.start_frame,
                rally.last_active_frame,
                rally.active_span()
            );
            return None;
        }

        self.last_emitted_end = Some(rally.last_active_frame);
        Some(ProvisionalSegment {
            start_frame: rally.start_frame,
            end_frame: rally.last_active_frame,
            contains_service_prep: rally.contains_service_prep,
        })
    }

    fn remember(&mut self, index: u64, label: FrameLabel) {
        if self.lookback_size == 0 {
            return;
        }
        if self.lookback.len() == self.lookback_size {
            self.lookback.pop_front();
        }
        self.lookback.push_back((index, label));
    }
}

/// Runs a whole classified stream through a fresh state machine.
pub fn segment_labels<I>(profile: &ParameterProfile, frames: I) -> Vec<ProvisionalSegment>
where
    I: IntoIterator<Item = (u64, FrameLabel)>,
{
    let mut machine = RallyStateMachine::new(profile);
    let mut segments: Vec<ProvisionalSegment> = frames
        .into_iter()
        .filter_map(|(index, label)| machine.step(index, label))
        .collect();
    segments.extend(machine.finish());
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame_classifier::FrameLabel::{
        Active as A, LowMovement as L, Unstable as U,
    };
    use crate::core_modules::profile::MatchType;

    fn profile(lookback: usize, allowed: u32, min_frames: u32) -> ParameterProfile {
        ParameterProfile {
            lookback_size: lookback,
            allowed_low_movement_frames: allowed,
            min_segment_frames: min_frames,
            ..ParameterProfile::builtin(MatchType::MenSingles)
        }
    }

    fn run(profile: &ParameterProfile, labels: &[FrameLabel]) -> Vec<(u64, u64)> {
        let frames = labels.iter().enumerate().map(|(i, &label)| (i as u64, label));
        segment_labels(profile, frames)
            .into_iter()
            .map(|s| (s.start_frame, s.end_frame))
            .collect()
    }

    #[test]
    fn all_active_stream_is_one_segment() {
        let labels = vec![A; 40];
        assert_eq!(run(&profile(5, 3, 2), &labels), vec![(0, 39)]);
    }

    #[test]
    fn unstable_frame_splits_an_active_run() {
        let mut labels = vec![A; 10];
        labels.push(U);
        labels.extend(vec![A; 10]);
        assert_eq!(run(&profile(5, 3, 2), &labels), vec![(0, 9), (11, 20)]);
    }

    #[test]
    fn lull_of_exactly_the_allowance_does_not_split() {
        let allowed = 4;
        let mut labels = vec![A; 5];
        labels.extend(vec![L; allowed as usize]);
        labels.extend(vec![A; 5]);
        assert_eq!(run(&profile(3, allowed, 2), &labels), vec![(0, 13)]);

        let segments = segment_labels(
            &profile(3, allowed, 2),
            labels.iter().enumerate().map(|(i, &l)| (i as u64, l)),
        );
        assert!(segments[0].contains_service_prep);
    }

    #[test]
    fn lull_one_frame_longer_splits() {
        let allowed = 4;
        let mut labels = vec![A; 5];
        labels.extend(vec![L; allowed as usize + 1]);
        labels.extend(vec![A; 5]);
        let segments = run(&profile(3, allowed, 2), &labels);
        assert_eq!(segments.len(), 2);
        // Closed at the last ACTIVE frame, not inside the lull.
        assert_eq!(segments[0], (0, 4));
        // Backdated into the lull, but only as far as the lookback reaches.
        assert_eq!(segments[1], (7, 14));
    }

    #[test]
    fn backdating_stops_at_an_unstable_frame() {
        let labels = [L, U, L, L, A, A, A];
        assert_eq!(run(&profile(10, 3, 2), &labels), vec![(2, 6)]);
    }

    #[test]
    fn backdating_never_reaches_into_the_previous_segment() {
        // Lookback covers the whole stream, the second rally still starts after the first.
        let labels = [A, A, A, L, L, L, A, A];
        let segments = run(&profile(20, 1, 2), &labels);
        assert_eq!(segments, vec![(0, 2), (3, 7)]);
    }

    #[test]
    fn first_frame_active_has_nothing_to_backdate() {
        let labels = [A, A, L];
        assert_eq!(run(&profile(5, 3, 2), &labels), vec![(0, 1)]);
    }

    #[test]
    fn isolated_spike_is_discarded() {
        let labels = [L, L, A, L, L, L, L, L];
        assert!(run(&profile(5, 2, 2), &labels).is_empty());
        assert_eq!(run(&profile(5, 2, 1), &labels), vec![(0, 2)]);
    }

    #[test]
    fn discarded_spike_does_not_block_backdating() {
        let labels = [L, A, U, L, L, A, A];
        assert_eq!(run(&profile(5, 2, 2), &labels), vec![(3, 6)]);
        let labels = [L, A, L, L, L, L, A, A];
        assert_eq!(run(&profile(10, 2, 2), &labels), vec![(0, 7)]);
    }

    #[test]
    fn end_of_stream_closes_at_the_last_active_frame() {
        let labels = [A, A, A, L, L];
        assert_eq!(run(&profile(5, 10, 2), &labels), vec![(0, 2)]);
    }

    #[test]
    fn state_is_observable_between_steps() {
        let mut machine = RallyStateMachine::new(&profile(2, 3, 1));
        assert_eq!(machine.state(), RallyState::Idle);
        machine.step(0, L);
        machine.step(1, A);
        assert_eq!(machine.state(), RallyState::PrepOrActive);
        machine.step(2, L);
        assert_eq!(machine.low_movement_run(), 1);
        assert_eq!(
            machine.open_segment(),
            Some(ProvisionalSegment {
                start_frame: 0,
                end_frame: 2,
                contains_service_prep: true
            })
        );
        let closed = machine.step(3, U).unwrap();
        assert_eq!((closed.start_frame, closed.end_frame), (0, 1));
        assert_eq!(machine.state(), RallyState::Idle);
        assert_eq!(machine.finish(), None);
    }

    #[test]
    fn lookback_scenario_by_the_second() {
        // stride 1s, lookback 2, allowance 6.
        let labels = [L, L, A, A, A, L, L, L, L, L, L, L, A, A, U];
        assert_eq!(run(&profile(2, 6, 2), &labels), vec![(0, 4), (10, 13)]);
    }
}
