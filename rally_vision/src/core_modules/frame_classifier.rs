// THEORY:
// The classifier is a pure function from one `FrameSample` and the active profile to
// one of three labels. It holds no state; the state machine is where history lives.
//
// Rules, first match wins:
//   1. stability below threshold        -> Unstable (cut, replay, closeup)
//   2. movement at/above movement thr.  -> Active
//   3. movement at/above low thr.       -> LowMovement (a lull or service prep)
//   4. otherwise                        -> LowMovement, flagged `minimal_movement`
//
// Rules 3 and 4 are identical to the state machine. The flag only exists so debug
// overlays can tell "players shuffling" from "nobody moving".

use crate::core_modules::frame_sample::FrameSample;
use crate::core_modules::profile::ParameterProfile;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameLabel {
    Active,
    LowMovement,
    Unstable,
}

impl FrameLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameLabel::Active => "ACTIVE",
            FrameLabel::LowMovement => "LOW_MOVEMENT",
            FrameLabel::Unstable => "UNSTABLE",
        }
    }
}

impl fmt::Display for FrameLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label together with the sample it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: FrameLabel,
    /// Movement fell below even the low-movement threshold.
    pub minimal_movement: bool,
    pub sample: FrameSample,
}

impl Classification {
    /// Marks a sample unusable regardless of its signals, e.g. outside the match.
    pub fn unstable(sample: FrameSample) -> Self {
        Self {
            label: FrameLabel::Unstable,
            minimal_movement: false,
            sample,
        }
    }
}

pub fn classify(sample: &FrameSample, profile: &ParameterProfile) -> Classification {
    let (label, minimal_movement) = if sample.stability_score < profile.stability_threshold {
        (FrameLabel::Unstable, false)
    } else if sample.movement_score >= profile.movement_threshold {
        (FrameLabel::Active, false)
    } else if sample.movement_score >= profile.low_movement_threshold {
        (FrameLabel::LowMovement, false)
    } else {
        (FrameLabel::LowMovement, true)
    };

    Classification {
        label,
        minimal_movement,
        sample: *sample,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame_sample::SamplingClock;
    use crate::core_modules::profile::{MatchType, ParameterProfile};

    fn sample(stability: f64, movement: f64) -> FrameSample {
        FrameSample::new(0, &SamplingClock::new(30.0, 2).unwrap(), stability, movement)
    }

    #[test]
    fn rules_apply_in_order() {
        let profile = ParameterProfile::builtin(MatchType::MenSingles);
        let cases = [
            // Instability wins over any amount of movement.
            (0.1, 1e9, FrameLabel::Unstable, false),
            (0.9, profile.movement_threshold, FrameLabel::Active, false),
            (0.9, profile.movement_threshold - 1.0, FrameLabel::LowMovement, false),
            (0.9, profile.low_movement_threshold, FrameLabel::LowMovement, false),
            (0.9, profile.low_movement_threshold - 1.0, FrameLabel::LowMovement, true),
            (0.9, 0.0, FrameLabel::LowMovement, true),
        ];
        for (stability, movement, label, minimal) in cases {
            let result = classify(&sample(stability, movement), &profile);
            assert_eq!(result.label, label, "stability {stability}, movement {movement}");
            assert_eq!(result.minimal_movement, minimal);
        }
    }

    #[test]
    fn stability_threshold_itself_is_stable() {
        let profile = ParameterProfile::builtin(MatchType::MixedDoubles);
        let result = classify(&sample(profile.stability_threshold, 0.0), &profile);
        assert_eq!(result.label, FrameLabel::LowMovement);
    }

    #[test]
    fn labels_serialise_in_screaming_case() {
        assert_eq!(serde_json::to_string(&FrameLabel::LowMovement).unwrap(), "\"LOW_MOVEMENT\"");
    }
}
