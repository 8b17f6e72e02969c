// THEORY:
// The `profile` module owns every tunable number in the engine. A `ParameterProfile`
// is resolved once per run from a match type, optionally patched with explicit
// overrides, validated, and then only ever read. Nothing downstream looks at
// ambient configuration; the classifier and the state machine receive the profile
// as an argument.
//
// Key architectural principles:
// 1.  **Closed Set of Match Types**: `MatchType` is an enum, so an unknown string is
//     rejected at parse time instead of silently falling back to a default.
// 2.  **Replace, Never Blend**: An override replaces the corresponding profile field
//     outright. There is no weighting between the built-in value and the override.
// 3.  **Validate Before Frames**: `validate` runs before any frame is pulled, so a
//     malformed profile never produces a partial segment list.
//
// Movement thresholds are sums of absolute 8-bit differences over the analysed
// region, calibrated for a 1080p source downscaled by half. Frame counts
// (`lookback_size`, `allowed_low_movement_frames`, `min_segment_frames`) are in
// sampled frames, calibrated for 15 samples per second.

use crate::error::{RallyError, RallyResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The match formats the engine ships tuned profiles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    MenSingles,
    WomenSingles,
    MenDoubles,
    WomenDoubles,
    MixedDoubles,
}

impl MatchType {
    pub const ALL: [MatchType; 5] = [
        MatchType::MenSingles,
        MatchType::WomenSingles,
        MatchType::MenDoubles,
        MatchType::WomenDoubles,
        MatchType::MixedDoubles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::MenSingles => "men_singles",
            MatchType::WomenSingles => "women_singles",
            MatchType::MenDoubles => "men_doubles",
            MatchType::WomenDoubles => "women_doubles",
            MatchType::MixedDoubles => "mixed_doubles",
        }
    }

    pub fn is_doubles(&self) -> bool {
        matches!(
            self,
            MatchType::MenDoubles | MatchType::WomenDoubles | MatchType::MixedDoubles
        )
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = RallyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        MatchType::ALL
            .into_iter()
            .find(|match_type| match_type.as_str() == normalized)
            .ok_or_else(|| RallyError::UnknownMatchType(value.to_string()))
    }
}

/// The immutable bundle of thresholds governing classification and segmentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterProfile {
    /// The match type this profile was resolved from.
    pub match_type: MatchType,
    /// Template match confidence below which a frame is UNSTABLE (camera cut, replay, closeup).
    pub stability_threshold: f64,
    /// Movement score at or above which a stable frame is ACTIVE.
    pub movement_threshold: f64,
    /// Movement score separating an ambiguous lull from a near-still frame. Debug only.
    pub low_movement_threshold: f64,
    /// Shortest final rally kept, in seconds.
    pub min_rally_duration: f64,
    /// Longest final rally before it is split, in seconds.
    pub max_rally_duration: f64,
    /// Largest gap, in seconds, across which two segments are merged.
    pub max_merge_gap: f64,
    /// Number of recent frames remembered for backdating a rally's start.
    pub lookback_size: usize,
    /// Consecutive LOW_MOVEMENT frames tolerated inside an open rally.
    pub allowed_low_movement_frames: u32,
    /// Shortest provisional segment the state machine emits, from trigger to last ACTIVE frame.
    pub min_segment_frames: u32,
}

const MEN_SINGLES: ParameterProfile = ParameterProfile {
    match_type: MatchType::MenSingles,
    stability_threshold: 0.62,
    movement_threshold: 240_000.0,
    low_movement_threshold: 75_000.0,
    min_rally_duration: 8.0,
    max_rally_duration: 120.0,
    max_merge_gap: 8.0,
    lookback_size: 45,
    allowed_low_movement_frames: 45,
    min_segment_frames: 2,
};

const WOMEN_SINGLES: ParameterProfile = ParameterProfile {
    match_type: MatchType::WomenSingles,
    movement_threshold: 220_800.0,
    low_movement_threshold: 69_000.0,
    ..MEN_SINGLES
};

// Doubles courts carry four players, so the whole frame moves more.
const MEN_DOUBLES: ParameterProfile = ParameterProfile {
    match_type: MatchType::MenDoubles,
    movement_threshold: 288_000.0,
    low_movement_threshold: 90_000.0,
    min_rally_duration: 7.0,
    max_merge_gap: 7.0,
    ..MEN_SINGLES
};

const WOMEN_DOUBLES: ParameterProfile = ParameterProfile {
    match_type: MatchType::WomenDoubles,
    movement_threshold: 268_800.0,
    low_movement_threshold: 84_000.0,
    ..MEN_DOUBLES
};

const MIXED_DOUBLES: ParameterProfile = ParameterProfile {
    match_type: MatchType::MixedDoubles,
    movement_threshold: 278_400.0,
    low_movement_threshold: 87_000.0,
    ..MEN_DOUBLES
};

impl ParameterProfile {
    /// Returns the built-in profile for a match type.
    pub fn builtin(match_type: MatchType) -> Self {
        match match_type {
            MatchType::MenSingles => MEN_SINGLES,
            MatchType::WomenSingles => WOMEN_SINGLES,
            MatchType::MenDoubles => MEN_DOUBLES,
            MatchType::WomenDoubles => WOMEN_DOUBLES,
            MatchType::MixedDoubles => MIXED_DOUBLES,
        }
    }

    /// Rejects profiles the engine cannot run with.
    pub fn validate(&self) -> RallyResult<()> {
        require_unit_interval("stability_threshold", self.stability_threshold)?;
        require_positive("movement_threshold", self.movement_threshold)?;
        require_positive("low_movement_threshold", self.low_movement_threshold)?;
        require_positive("min_rally_duration", self.min_rally_duration)?;
        require_positive("max_rally_duration", self.max_rally_duration)?;

        if !self.max_merge_gap.is_finite() || self.max_merge_gap < 0.0 {
            return Err(RallyError::configuration(
                "max_merge_gap",
                format!(
                    "must be a finite, non-negative number of seconds, got {}",
                    self.max_merge_gap
                ),
            ));
        }
        if self.low_movement_threshold > self.movement_threshold {
            return Err(RallyError::configuration(
                "low_movement_threshold",
                format!(
                    "must not exceed movement_threshold ({} > {})",
                    self.low_movement_threshold, self.movement_threshold
                ),
            ));
        }
        // Splitting must never produce a piece shorter than the minimum.
        if self.max_rally_duration < 2.0 * self.min_rally_duration {
            return Err(RallyError::configuration(
                "max_rally_duration",
                format!(
                    "must be at least twice min_rally_duration ({} < 2 x {})",
                    self.max_rally_duration, self.min_rally_duration
                ),
            ));
        }
        if self.allowed_low_movement_frames == 0 {
            return Err(RallyError::configuration(
                "allowed_low_movement_frames",
                "must be at least 1",
            ));
        }
        if self.min_segment_frames == 0 {
            return Err(RallyError::configuration("min_segment_frames", "must be at least 1"));
        }
        Ok(())
    }
}

fn require_positive(field: &'static str, value: f64) -> RallyResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RallyError::configuration(
            field,
            format!("must be a finite number greater than zero, got {value}"),
        ))
    }
}

fn require_unit_interval(field: &'static str, value: f64) -> RallyResult<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(RallyError::configuration(
            field,
            format!("must lie in (0, 1], got {value}"),
        ))
    }
}

/// Explicit replacements for individual profile fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileOverrides {
    pub stability_threshold: Option<f64>,
    pub movement_threshold: Option<f64>,
    pub low_movement_threshold: Option<f64>,
    pub min_rally_duration: Option<f64>,
    pub max_rally_duration: Option<f64>,
    pub max_merge_gap: Option<f64>,
    pub lookback_size: Option<usize>,
    pub allowed_low_movement_frames: Option<u32>,
    pub min_segment_frames: Option<u32>,
}

impl ProfileOverrides {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Reads a TOML overrides file. Unknown keys are an error.
    pub fn load(path: &Path) -> RallyResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| RallyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| RallyError::OverridesParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Layers `other` on top of `self`; fields set in `other` win.
    pub fn merged_with(self, other: &ProfileOverrides) -> Self {
        Self {
            stability_threshold: other.stability_threshold.or(self.stability_threshold),
            movement_threshold: other.movement_threshold.or(self.movement_threshold),
            low_movement_threshold: other.low_movement_threshold.or(self.low_movement_threshold),
            min_rally_duration: other.min_rally_duration.or(self.min_rally_duration),
            max_rally_duration: other.max_rally_duration.or(self.max_rally_duration),
            max_merge_gap: other.max_merge_gap.or(self.max_merge_gap),
            lookback_size: other.lookback_size.or(self.lookback_size),
            allowed_low_movement_frames: other
                .allowed_low_movement_frames
                .or(self.allowed_low_movement_frames),
            min_segment_frames: other.min_segment_frames.or(self.min_segment_frames),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ProfileOverrides::default()
    }

    pub fn apply(&self, profile: ParameterProfile) -> ParameterProfile {
        ParameterProfile {
            match_type: profile.match_type,
            stability_threshold: self.stability_threshold.unwrap_or(profile.stability_threshold),
            movement_threshold: self.movement_threshold.unwrap_or(profile.movement_threshold),
            low_movement_threshold: self
                .low_movement_threshold
                .unwrap_or(profile.low_movement_threshold),
            min_rally_duration: self.min_rally_duration.unwrap_or(profile.min_rally_duration),
            max_rally_duration: self.max_rally_duration.unwrap_or(profile.max_rally_duration),
            max_merge_gap: self.max_merge_gap.unwrap_or(profile.max_merge_gap),
            lookback_size: self.lookback_size.unwrap_or(profile.lookback_size),
            allowed_low_movement_frames: self
                .allowed_low_movement_frames
                .unwrap_or(profile.allowed_low_movement_frames),
            min_segment_frames: self.min_segment_frames.unwrap_or(profile.min_segment_frames),
        }
    }
}

/// Resolves the built-in profile for a match type string.
pub fn resolve(match_type: &str) -> RallyResult<ParameterProfile> {
    resolve_with_overrides(match_type, &ProfileOverrides::default())
}

/// Resolves a profile, applies overrides and validates the result.
pub fn resolve_with_overrides(
    match_type: &str,
    overrides: &ProfileOverrides,
) -> RallyResult<ParameterProfile> {
    let match_type: MatchType = match_type.parse()?;
    let profile = overrides.apply(ParameterProfile::builtin(match_type));
    profile.validate()?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_profile_is_valid() {
        for match_type in MatchType::ALL {
            let profile = resolve(match_type.as_str()).expect("builtin profile resolves");
            assert_eq!(profile.match_type, match_type);
        }
    }

    #[test]
    fn doubles_profiles_raise_movement_thresholds() {
        let men_singles = ParameterProfile::builtin(MatchType::MenSingles);
        let women_singles = ParameterProfile::builtin(MatchType::WomenSingles);
        for doubles in [MatchType::MenDoubles, MatchType::WomenDoubles, MatchType::MixedDoubles] {
            let profile = ParameterProfile::builtin(doubles);
            assert!(doubles.is_doubles());
            assert!(profile.movement_threshold > men_singles.movement_threshold);
            assert!(profile.movement_threshold > women_singles.movement_threshold);
        }
    }

    #[test]
    fn unknown_match_type_is_a_configuration_error() {
        let err = resolve("badminton_triples").unwrap_err();
        assert!(matches!(
            err,
            RallyError::UnknownMatchType(ref name) if name == "badminton_triples"
        ));
        assert!(err.is_configuration());
    }

    #[test]
    fn match_type_parsing_ignores_case_and_whitespace() {
        assert_eq!(" Mixed_Doubles ".parse::<MatchType>().unwrap(), MatchType::MixedDoubles);
    }

    #[test]
    fn overrides_replace_fields_outright() {
        let overrides = ProfileOverrides {
            movement_threshold: Some(500_000.0),
            lookback_size: Some(3),
            ..Default::default()
        };
        let profile = resolve_with_overrides("men_singles", &overrides).unwrap();
        assert_eq!(profile.movement_threshold, 500_000.0);
        assert_eq!(profile.lookback_size, 3);
        assert_eq!(profile.low_movement_threshold, MEN_SINGLES.low_movement_threshold);
    }

    #[test]
    fn non_positive_thresholds_are_rejected() {
        let overrides = ProfileOverrides {
            movement_threshold: Some(0.0),
            ..Default::default()
        };
        let err = resolve_with_overrides("women_doubles", &overrides).unwrap_err();
        assert!(matches!(err, RallyError::Configuration { field: "movement_threshold", .. }));

        let overrides = ProfileOverrides {
            allowed_low_movement_frames: Some(0),
            ..Default::default()
        };
        assert!(resolve_with_overrides("men_singles", &overrides).is_err());
    }

    #[test]
    fn max_duration_must_leave_room_for_splitting() {
        let overrides = ProfileOverrides {
            min_rally_duration: Some(10.0),
            max_rally_duration: Some(15.0),
            ..Default::default()
        };
        let err = resolve_with_overrides("men_singles", &overrides).unwrap_err();
        assert!(matches!(err, RallyError::Configuration { field: "max_rally_duration", .. }));
    }

    #[test]
    fn overrides_parse_from_toml_and_reject_unknown_keys() {
        let parsed =
            ProfileOverrides::from_toml_str("movement_threshold = 300000\nlookback_size = 10\n")
                .expect("valid overrides");
        assert_eq!(parsed.movement_threshold, Some(300_000.0));
        assert_eq!(parsed.lookback_size, Some(10));

        assert!(ProfileOverrides::from_toml_str("movment_threshold = 1.0").is_err());
    }

    #[test]
    fn later_overrides_win_when_merged() {
        let file = ProfileOverrides {
            movement_threshold: Some(1.0),
            max_merge_gap: Some(3.0),
            ..Default::default()
        };
        let cli = ProfileOverrides {
            movement_threshold: Some(2.0),
            ..Default::default()
        };
        let merged = file.merged_with(&cli);
        assert_eq!(merged.movement_threshold, Some(2.0));
        assert_eq!(merged.max_merge_gap, Some(3.0));
        assert!(!merged.is_empty());
        assert!(ProfileOverrides::default().is_empty());
    }
}
