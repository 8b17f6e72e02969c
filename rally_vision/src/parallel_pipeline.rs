// THEORY:
// One video is an inherently sequential fold: the state machine must see frames in
// order. Many videos, though, share nothing but the read-only profile, so the unit
// of parallelism is the whole video.
//
// `ParallelPipeline` runs each video's segmentation on tokio's blocking pool and caps
// how many run at once with a semaphore sized to the machine's cores. Results come
// back in submission order, one outcome per job, and a failure in one video never
// affects the others.

use crate::core_modules::analysis_window::AnalysisWindow;
use crate::core_modules::debug_sink::{NullSink, RecordingSink};
use crate::core_modules::frame_source::FrameSource;
use crate::core_modules::template::ReferenceTemplate;
use crate::error::{RallyError, RallyResult};
use crate::pipeline::{RallyPipeline, SegmentationReport};
use futures::future::join_all;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// One video to segment.
pub struct VideoJob<S> {
    pub name: String,
    pub source: S,
    pub template: ReferenceTemplate,
    /// Keep every frame's diagnostics in the outcome.
    pub record_frames: bool,
    /// Replaces the shared pipeline's analysis window for this video only.
    pub window: Option<AnalysisWindow>,
}

impl<S> VideoJob<S> {
    pub fn new(name: impl Into<String>, source: S, template: ReferenceTemplate) -> Self {
        Self {
            name: name.into(),
            source,
            template,
            record_frames: false,
            window: None,
        }
    }

    pub fn recording_frames(mut self) -> Self {
        self.record_frames = true;
        self
    }

    pub fn with_window(mut self, window: AnalysisWindow) -> Self {
        self.window = Some(window);
        self
    }
}

pub struct VideoOutcome {
    pub name: String,
    pub result: RallyResult<SegmentationReport>,
    /// Present when the job asked for frame diagnostics and the run succeeded.
    pub debug: Option<RecordingSink>,
}

pub struct ParallelPipeline {
    pipeline: Arc<RallyPipeline>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl ParallelPipeline {
    pub fn new(pipeline: RallyPipeline) -> Self {
        Self::with_concurrency(pipeline, num_cpus::get())
    }

    pub fn with_concurrency(pipeline: RallyPipeline, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            pipeline: Arc::new(pipeline),
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn pipeline(&self) -> &RallyPipeline {
        &self.pipeline
    }

    /// Segments every job, at most `concurrency` at a time.
    pub async fn run_all<S>(&self, jobs: Vec<VideoJob<S>>) -> Vec<VideoOutcome>
    where
        S: FrameSource + Send + 'static,
    {
        info!("segmenting {} video(s), {} at a time", jobs.len(), self.concurrency);
        let runs = jobs.into_iter().map(|job| self.run_one(job));
        join_all(runs).await
    }

    async fn run_one<S>(&self, job: VideoJob<S>) -> VideoOutcome
    where
        S: FrameSource + Send + 'static,
    {
        let VideoJob {
            name,
            source,
            template,
            record_frames,
            window,
        } = job;

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                return VideoOutcome {
                    name,
                    result: Err(RallyError::Worker(err.to_string())),
                    debug: None,
                };
            }
        };

        let pipeline = match window {
            Some(window) => Arc::new(self.pipeline.with_window(Some(window))),
            None => Arc::clone(&self.pipeline),
        };
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            if record_frames {
                let mut sink = RecordingSink::new();
                let report = pipeline.run_with_sink(source, &template, &mut sink);
                (report, Some(sink))
            } else {
                (pipeline.run_with_sink(source, &template, NullSink), None)
            }
        });

        let (result, debug) = match task.await {
            Ok((Ok(report), debug)) => (Ok(report), debug),
            Ok((Err(err), _)) => (Err(err), None),
            Err(join_err) => (Err(RallyError::Worker(format!("{name}: {join_err}"))), None),
        };
        if let Err(err) = &result {
            warn!("segmentation of {name} failed: {err}");
        }

        VideoOutcome { name, result, debug }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame_sample::SamplingClock;
    use crate::core_modules::frame_source::{SourceFrame, VecFrameSource};
    use crate::error::FrameSourceError;
    use crate::pipeline::PipelineConfig;
    use image::{GrayImage, Luma};

    fn template() -> ReferenceTemplate {
        let image = GrayImage::from_fn(8, 8, |x, y| Luma([(x * 20 + y * 3) as u8]));
        ReferenceTemplate::new("court", image, None).unwrap()
    }

    fn still_video(frames: usize) -> VecFrameSource {
        let clock = SamplingClock::new(2.0, 1).unwrap();
        VecFrameSource::from_images(clock, vec![GrayImage::from_pixel(16, 16, Luma([90])); frames])
    }

    struct PanickingSource;

    impl FrameSource for PanickingSource {
        fn clock(&self) -> SamplingClock {
            SamplingClock::new(2.0, 1).unwrap()
        }

        fn next_frame(&mut self) -> Option<Result<SourceFrame, FrameSourceError>> {
            panic!("decoder crashed")
        }
    }

    #[tokio::test]
    async fn outcomes_come_back_in_submission_order() {
        let pipeline = RallyPipeline::new(PipelineConfig::default()).unwrap();
        let parallel = ParallelPipeline::with_concurrency(pipeline, 2);
        let jobs = (0..5)
            .map(|i| VideoJob::new(format!("video_{i}"), still_video(4 + i), template()))
            .collect();

        let outcomes = parallel.run_all(jobs).await;
        let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["video_0", "video_1", "video_2", "video_3", "video_4"]);
        for (i, outcome) in outcomes.iter().enumerate() {
            let report = outcome.result.as_ref().unwrap();
            assert_eq!(report.frames_processed, 4 + i as u64);
            assert!(report.segments.is_empty());
        }
    }

    #[tokio::test]
    async fn a_crashing_worker_only_fails_its_own_video() {
        let pipeline = RallyPipeline::new(PipelineConfig::default()).unwrap();
        let parallel = ParallelPipeline::with_concurrency(pipeline, 1);
        let broken: Box<dyn FrameSource + Send> = Box::new(PanickingSource);
        let fine: Box<dyn FrameSource + Send> = Box::new(still_video(3));
        let jobs = vec![
            VideoJob::new("broken", broken, template()),
            VideoJob::new("fine", fine, template()).recording_frames(),
        ];

        let outcomes = parallel.run_all(jobs).await;
        assert!(matches!(outcomes[0].result, Err(RallyError::Worker(_))));
        assert!(outcomes[1].result.is_ok());
        assert_eq!(outcomes[1].debug.as_ref().map(|sink| sink.frames.len()), Some(3));
    }

    #[tokio::test]
    async fn a_job_window_only_limits_that_job() {
        let pipeline = RallyPipeline::new(PipelineConfig::default()).unwrap();
        let parallel = ParallelPipeline::with_concurrency(pipeline, 2);
        let window = AnalysisWindow::new(1.0, 2.0).unwrap();
        let jobs = vec![
            VideoJob::new("clipped", still_video(10), template()).with_window(window),
            VideoJob::new("whole", still_video(10), template()),
        ];

        let outcomes = parallel.run_all(jobs).await;
        // 2 fps: frames 2 and 3 fall inside [1.0, 2.0).
        assert_eq!(outcomes[0].result.as_ref().unwrap().frames_processed, 2);
        assert_eq!(outcomes[1].result.as_ref().unwrap().frames_processed, 10);
        assert!(parallel.pipeline().config().window.is_none());
    }
}
