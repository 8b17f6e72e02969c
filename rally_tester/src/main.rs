mod cli;
mod output;
mod settings;
mod source;
#[cfg(feature = "video")]
mod video;

use anyhow::{Context, bail};
use log::{error, info, warn};
use rally_vision::core_modules::analysis_window::AnalysisWindow;
use rally_vision::{
    MatchType, ParallelPipeline, RallyPipeline, ReferenceTemplate, SamplingClock, TemplateLibrary,
    VideoJob,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::output::{RunOutput, format_timestamp};
use crate::settings::{RunSettings, TestClip, resolve_settings};
use crate::source::{BoxedSource, job_name, open_input};

/// Per-input context that outlives the job itself.
struct JobInfo {
    name: String,
    clock: SamplingClock,
    window: Option<AnalysisWindow>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Argument Parsing & Setup ---
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let (cli, sources) = cli::parse_cli();
    let settings = resolve_settings(cli, &sources)?;
    let match_type = settings.match_type()?;

    if let Some(name) = &settings.save_template {
        return save_template(&settings, name);
    }

    // --- 2. Template & Pipeline Initialization ---
    let template = load_template(&settings, match_type)?;
    info!("using court template '{}'", template.name());
    let pipeline = RallyPipeline::new(settings.pipeline.clone())?;
    let parallel = match settings.jobs {
        Some(jobs) => ParallelPipeline::with_concurrency(pipeline, jobs),
        None => ParallelPipeline::new(pipeline),
    };

    // --- 3. Job Construction ---
    let mut rng = match settings.test_clip.and_then(|clip| clip.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut jobs: Vec<VideoJob<BoxedSource>> = Vec::with_capacity(settings.inputs.len());
    let mut infos: Vec<JobInfo> = Vec::with_capacity(settings.inputs.len());
    for input in &settings.inputs {
        let source = open_input(input, settings.clock)
            .with_context(|| format!("failed to open input {}", input.display()))?;
        let taken: Vec<String> = infos.iter().map(|info| info.name.clone()).collect();
        let name = job_name(input, &taken);
        let clock = source.clock();

        let clip_window = match settings.test_clip {
            Some(clip) => test_window(&name, &source, clip, &mut rng)?,
            None => None,
        };
        let mut job = VideoJob::new(name.clone(), source, template.clone());
        if settings.records_frames() {
            job = job.recording_frames();
        }
        if let Some(window) = clip_window {
            job = job.with_window(window);
        }

        infos.push(JobInfo {
            name,
            clock,
            window: clip_window.or(settings.pipeline.window),
        });
        jobs.push(job);
    }

    // --- 4. Segmentation ---
    let outcomes = parallel.run_all(jobs).await;

    // --- 5. Results & Output ---
    let profile = parallel.pipeline().profile();
    let mut failures = 0usize;
    for (info, outcome) in infos.iter().zip(outcomes) {
        let report = match outcome.result {
            Ok(report) => report,
            Err(err) => {
                error!("{}: {err}", info.name);
                failures += 1;
                continue;
            }
        };

        info!("{}: {} rallies", info.name, report.segments.len());
        for (number, segment) in report.segments.iter().enumerate() {
            info!(
                "  rally {:>3}: {} - {} ({:.1}s)",
                number + 1,
                format_timestamp(segment.start_time()),
                format_timestamp(segment.end_time()),
                segment.duration()
            );
        }

        let run_output = RunOutput {
            name: &info.name,
            clock: info.clock,
            window: info.window,
            profile,
            trim: &settings.pipeline.trim,
        };
        let path = run_output.write_segments(&settings.output_dir, &report)?;
        info!("wrote {}", path.display());

        if let Some(debug) = &outcome.debug {
            if settings.dump_frames {
                let path = run_output.write_frames(&settings.output_dir, &debug.frames)?;
                info!("wrote {}", path.display());
            }
            if settings.timeline {
                let path = run_output.write_timeline(
                    &settings.output_dir,
                    &debug.frames,
                    &report.segments,
                )?;
                info!("wrote {}", path.display());
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} input(s) failed", infos.len());
    }
    Ok(())
}

fn load_template(
    settings: &RunSettings,
    match_type: MatchType,
) -> anyhow::Result<ReferenceTemplate> {
    let template = match &settings.template {
        Some(path) => ReferenceTemplate::load(path, None)?,
        None => {
            let library = TemplateLibrary::load(&settings.templates)?;
            library.template_for(match_type)?.clone()
        }
    };
    let roi = settings.template_roi.or(template.roi());
    Ok(template.with_roi(roi))
}

/// Test mode: a random clip of each input, or the whole input when its length is unknown.
fn test_window(
    name: &str,
    source: &BoxedSource,
    clip: TestClip,
    rng: &mut StdRng,
) -> anyhow::Result<Option<AnalysisWindow>> {
    let Some(total_frames) = source.total_frames() else {
        warn!("{name}: length unknown, test mode analyses the whole input");
        return Ok(None);
    };
    let total_seconds = source.clock().timestamp(total_frames);
    let window = AnalysisWindow::random_clip(total_seconds, clip.clip_seconds, rng)?;
    info!(
        "{name}: test mode clip {} - {}",
        format_timestamp(window.start),
        format_timestamp(window.end)
    );
    Ok(Some(window))
}

fn save_template(settings: &RunSettings, name: &str) -> anyhow::Result<()> {
    let input = settings
        .inputs
        .first()
        .context("--save-template needs an input to take the frame from")?;
    let mut source = open_input(input, settings.clock)?;
    let frame = source
        .next_frame()
        .with_context(|| format!("{} has no frames", input.display()))??;

    let mut library = TemplateLibrary::load(&settings.templates)?;
    let template = library.add_from_frame(name, frame.image)?;
    info!(
        "template '{}' ({}x{}) added to {}",
        template.name(),
        template.image().width(),
        template.image().height(),
        settings.templates.display()
    );
    Ok(())
}
