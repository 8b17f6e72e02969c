// THEORY:
// The `pipeline` module is the top-level API for the rally engine. It wires the
// stages together into a single streaming fold over one video:
//
//   frames -> SignalExtractor -> classify -> RallyStateMachine -> post_process
//
// Everything that can be wrong with the configuration is checked in
// `RallyPipeline::new`, before a frame source is even handed over. After that a
// run cannot fail: a source that dies early just ends the stream, and whatever was
// segmented up to that point is post-processed and returned.
//
// The pipeline also owns the two run-level filters that are not part of the
// per-frame algorithm: the analysis window (samples outside it are skipped) and the
// trim plan (samples outside the match are forced to UNSTABLE).

use crate::core_modules::analysis_window::AnalysisWindow;
use crate::core_modules::debug_sink::{DebugSink, FrameDebug, NullSink};
use crate::core_modules::frame_classifier::{classify, Classification};
use crate::core_modules::frame_sample::{FrameSample, SamplingClock};
use crate::core_modules::frame_source::FrameSource;
use crate::core_modules::profile::{resolve_with_overrides, ParameterProfile, ProfileOverrides};
use crate::core_modules::rally_state_machine::{ProvisionalSegment, RallyStateMachine};
use crate::core_modules::signal_extractor::{ExtractorOptions, SignalExtractor};
use crate::core_modules::template::ReferenceTemplate;
use crate::core_modules::trim_plan::TrimPlan;
use crate::error::RallyResult;
use log::{debug, info};

// Re-export key data structures for the public API.
pub use crate::core_modules::frame_classifier::FrameLabel;
pub use crate::core_modules::profile::MatchType;
pub use crate::core_modules::segment_post_processor::{finalize, RallySegment};

const PROGRESS_STEP_PERCENT: u64 = 5;

/// Everything a single segmentation run is configured by.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// One of the match type names, e.g. `men_singles`.
    pub match_type: String,
    /// Explicit threshold replacements applied on top of the built-in profile.
    pub overrides: ProfileOverrides,
    pub extractor: ExtractorOptions,
    /// Only samples inside this window are analysed.
    pub window: Option<AnalysisWindow>,
    pub trim: TrimPlan,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_type: MatchType::MenSingles.as_str().to_string(),
            overrides: ProfileOverrides::default(),
            extractor: ExtractorOptions::default(),
            window: None,
            trim: TrimPlan::default(),
        }
    }
}

impl PipelineConfig {
    pub fn for_match_type(match_type: impl Into<String>) -> Self {
        Self {
            match_type: match_type.into(),
            ..Self::default()
        }
    }
}

/// The outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationReport {
    /// Final rallies, sorted and non-overlapping.
    pub segments: Vec<RallySegment>,
    /// What the state machine emitted, before merging, filtering and splitting.
    pub provisional: Vec<ProvisionalSegment>,
    /// Samples that reached the classifier.
    pub frames_processed: u64,
}

/// A configured, validated segmentation engine. Cheap to share across runs.
#[derive(Debug, Clone)]
pub struct RallyPipeline {
    profile: ParameterProfile,
    config: PipelineConfig,
}

impl RallyPipeline {
    pub fn new(config: PipelineConfig) -> RallyResult<Self> {
        let profile = resolve_with_overrides(&config.match_type, &config.overrides)?;
        config.extractor.validate()?;

        info!(
            "rally segmentation for {}: stability >= {:.2}, movement >= {:.0}, \
             low movement >= {:.0}, rally {:.1}s..{:.1}s, merge gap {:.1}s, \
             lookback {} frames, low-movement allowance {} frames",
            profile.match_type,
            profile.stability_threshold,
            profile.movement_threshold,
            profile.low_movement_threshold,
            profile.min_rally_duration,
            profile.max_rally_duration,
            profile.max_merge_gap,
            profile.lookback_size,
            profile.allowed_low_movement_frames,
        );
        if !config.overrides.is_empty() {
            debug!("profile overrides in effect: {:?}", config.overrides);
        }

        Ok(Self { profile, config })
    }

    pub fn profile(&self) -> &ParameterProfile {
        &self.profile
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The same engine, restricted to another analysis window.
    pub fn with_window(&self, window: Option<AnalysisWindow>) -> Self {
        let mut pipeline = self.clone();
        pipeline.config.window = window;
        pipeline
    }

    /// Segments one video and returns its final rallies.
    pub fn run<S: FrameSource>(
        &self,
        source: S,
        template: &ReferenceTemplate,
    ) -> RallyResult<Vec<RallySegment>> {
        Ok(self.run_with_sink(source, template, NullSink)?.segments)
    }

    /// Segments one video, reporting every frame and closed segment to `sink`.
    pub fn run_with_sink<S: FrameSource, D: DebugSink>(
        &self,
        source: S,
        template: &ReferenceTemplate,
        sink: D,
    ) -> RallyResult<SegmentationReport> {
        let extractor = SignalExtractor::new(source, template, self.config.extractor)?;
        let clock = extractor.clock();
        let total_frames = extractor.total_frames();
        Ok(self.segment_samples(extractor, clock, total_frames, sink))
    }

    /// The fold itself, over samples that were measured elsewhere.
    pub fn segment_samples<I, D>(
        &self,
        samples: I,
        clock: SamplingClock,
        total_frames: Option<u64>,
        mut sink: D,
    ) -> SegmentationReport
    where
        I: IntoIterator<Item = FrameSample>,
        D: DebugSink,
    {
        let mut machine = RallyStateMachine::new(&self.profile);
        let mut provisional = Vec::new();
        let mut progress = ProgressLog::new(total_frames);
        let mut frames_processed = 0u64;

        for sample in samples {
            if let Some(window) = self.config.window {
                if sample.timestamp >= window.end {
                    break;
                }
                if !window.contains(sample.timestamp) {
                    continue;
                }
            }

            // --- 1. Classify ---
            let classification = if self.config.trim.is_kept(sample.timestamp) {
                classify(&sample, &self.profile)
            } else {
                Classification::unstable(sample)
            };

            // --- 2. Step the state machine ---
            let closed = machine.step(sample.index, classification.label);
            frames_processed += 1;

            // --- 3. Report ---
            sink.on_frame(&FrameDebug {
                index: sample.index,
                timestamp: sample.timestamp,
                label: classification.label,
                minimal_movement: classification.minimal_movement,
                stability_score: sample.stability_score,
                movement_score: sample.movement_score,
                rally_open: machine.open_segment().is_some(),
                low_movement_run: machine.low_movement_run(),
            });
            if let Some(segment) = closed {
                debug!(
                    "provisional rally {:.1}s..{:.1}s",
                    clock.timestamp(segment.start_frame),
                    clock.timestamp(segment.end_frame)
                );
                sink.on_segment_closed(&segment);
                provisional.push(segment);
            }

            progress.update(&sample, provisional.len());
        }

        if let Some(segment) = machine.finish() {
            sink.on_segment_closed(&segment);
            provisional.push(segment);
        }

        let segments = finalize(&provisional, &clock, &self.profile);
        let total_seconds: f64 = segments.iter().map(RallySegment::duration).sum();
        info!(
            "found {} rallies ({:.1}s of play) from {} provisional segment(s) over {} frames",
            segments.len(),
            total_seconds,
            provisional.len(),
            frames_processed
        );

        SegmentationReport {
            segments,
            provisional,
            frames_processed,
        }
    }
}

/// Resolves the configuration, then segments one video.
pub fn segment_video<S: FrameSource>(
    config: PipelineConfig,
    source: S,
    template: &ReferenceTemplate,
) -> RallyResult<Vec<RallySegment>> {
    RallyPipeline::new(config)?.run(source, template)
}

struct ProgressLog {
    total_frames: Option<u64>,
    next_percent: u64,
}

impl ProgressLog {
    fn new(total_frames: Option<u64>) -> Self {
        Self {
            total_frames: total_frames.filter(|&total| total > 0),
            next_percent: PROGRESS_STEP_PERCENT,
        }
    }

    fn update(&mut self, sample: &FrameSample, closed: usize) {
        let Some(total) = self.total_frames else {
            return;
        };
        let percent = ((sample.index + 1) * 100 / total).min(100);
        if percent >= self.next_percent && self.next_percent <= 100 {
            info!(
                "progress {percent}% (at {:.1}s, {closed} provisional rallies so far)",
                sample.timestamp
            );
            self.next_percent = (percent / PROGRESS_STEP_PERCENT + 1) * PROGRESS_STEP_PERCENT;
        }
    }
}
