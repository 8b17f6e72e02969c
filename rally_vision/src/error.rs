// THEORY:
// Every failure the engine can report is fatal and happens before the first frame
// is pulled: a bad match type, a bad threshold, a missing template. Problems with
// the frame source itself are not errors at this level; they end the stream and
// whatever has been segmented so far is still returned. `FrameSourceError` exists
// so sources can say *why* they stopped, and the extractor logs it.

use std::path::PathBuf;
use thiserror::Error;

pub type RallyResult<T> = Result<T, RallyError>;

#[derive(Debug, Error)]
pub enum RallyError {
    #[error(
        "unknown match type '{0}' (expected one of men_singles, women_singles, men_doubles, \
         women_doubles, mixed_doubles)"
    )]
    UnknownMatchType(String),

    #[error("invalid configuration for '{field}': {reason}")]
    Configuration { field: &'static str, reason: String },

    #[error("failed to parse overrides in {}: {source}", .path.display())]
    OverridesParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("reference template unavailable at {}: {reason}", .path.display())]
    TemplateUnavailable { path: PathBuf, reason: String },

    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segmentation worker failed: {0}")]
    Worker(String),
}

impl RallyError {
    pub fn configuration(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            reason: reason.into(),
        }
    }

    /// True for the error kinds a caller can fix by changing configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownMatchType(_) | Self::Configuration { .. } | Self::OverridesParse { .. }
        )
    }
}

/// Why a frame source stopped delivering frames.
#[derive(Debug, Error)]
pub enum FrameSourceError {
    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: u64, reason: String },

    #[error("frame index {got} does not follow {previous}")]
    OutOfOrder { previous: u64, got: u64 },
}
