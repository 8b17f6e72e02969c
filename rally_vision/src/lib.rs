// THEORY:
// This file is the main entry point for the `rally_vision` library crate. It turns
// a decoded badminton broadcast into the list of time spans that contain play.
//
// The public surface is deliberately small: `RallyPipeline` (configure once, run
// per video), `ParallelPipeline` (many videos at once), the `FrameSource` and
// `DebugSink` seams for collaborators, and the `RallySegment` output. The stages
// themselves live in `core_modules` and are public so that each one can be driven
// and tested on its own, without a real video.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::debug_sink::{DebugSink, FrameDebug, NullSink, RecordingSink};
pub use core_modules::frame_sample::{FrameSample, RegionOfInterest, SamplingClock};
pub use core_modules::frame_source::{FrameSource, ImageSequenceSource, SourceFrame, VecFrameSource};
pub use core_modules::profile::{ParameterProfile, ProfileOverrides};
pub use core_modules::template::{ReferenceTemplate, TemplateLibrary};
pub use error::{FrameSourceError, RallyError, RallyResult};
pub use parallel_pipeline::{ParallelPipeline, VideoJob, VideoOutcome};
pub use pipeline::{
    FrameLabel, MatchType, PipelineConfig, RallyPipeline, RallySegment, SegmentationReport,
};
