use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use rally_vision::core_modules::analysis_window::{AnalysisWindow, DEFAULT_CLIP_SECONDS};
use rally_vision::core_modules::frame_sample::DEFAULT_STRIDE;
use rally_vision::core_modules::signal_extractor::ExtractorOptions;
use rally_vision::core_modules::trim_plan::TrimPlan;
use rally_vision::{MatchType, PipelineConfig, ProfileOverrides, RegionOfInterest, SamplingClock};
use serde::Deserialize;

use crate::cli::{CliArgs, CliSources};

const DEFAULT_CONFIG_NAME: &str = "rally_tester.toml";
const DEFAULT_FPS: f64 = 30.0;

/// The on-disk configuration. Every key is optional; command-line flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub match_type: Option<String>,
    pub fps: Option<f64>,
    pub stride: Option<u32>,
    pub templates: Option<PathBuf>,
    pub template: Option<PathBuf>,
    pub template_roi: Option<RegionOfInterest>,
    pub output_dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub profile: ProfileOverrides,
    pub extractor: Option<ExtractorOptions>,
    pub trim: TrimSection,
    pub test_mode: TestModeSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrimSection {
    pub match_start: Option<f64>,
    pub match_end: Option<f64>,
    pub pauses: Vec<(f64, f64)>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestModeSection {
    pub enabled: bool,
    pub clip_seconds: Option<f64>,
    pub seed: Option<u64>,
}

/// How test mode picks its clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestClip {
    pub clip_seconds: f64,
    pub seed: Option<u64>,
}

/// Everything a run needs, after file and command line are merged.
#[derive(Debug)]
pub struct RunSettings {
    pub inputs: Vec<PathBuf>,
    pub pipeline: PipelineConfig,
    pub clock: SamplingClock,
    pub templates: PathBuf,
    pub template: Option<PathBuf>,
    pub template_roi: Option<RegionOfInterest>,
    pub test_clip: Option<TestClip>,
    pub output_dir: PathBuf,
    pub dump_frames: bool,
    pub timeline: bool,
    pub jobs: Option<usize>,
    pub save_template: Option<String>,
}

impl RunSettings {
    pub fn match_type(&self) -> anyhow::Result<MatchType> {
        self.pipeline
            .match_type
            .parse::<MatchType>()
            .map_err(anyhow::Error::from)
    }

    /// Frame diagnostics are kept whenever an output needs them.
    pub fn records_frames(&self) -> bool {
        self.dump_frames || self.timeline
    }
}

pub fn resolve_settings(cli: CliArgs, sources: &CliSources) -> anyhow::Result<RunSettings> {
    let file = match config_path(&cli) {
        Some(path) => load_config(&path)?,
        None => FileConfig::default(),
    };
    merge(cli, sources, file)
}

fn config_path(cli: &CliArgs) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    let local = PathBuf::from(DEFAULT_CONFIG_NAME);
    local.is_file().then_some(local)
}

pub fn load_config(path: &Path) -> anyhow::Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

fn merge(cli: CliArgs, sources: &CliSources, file: FileConfig) -> anyhow::Result<RunSettings> {
    // --- 1. Profile overrides: file, then overrides file, then flags ---
    let mut overrides = file.profile;
    if let Some(path) = &cli.overrides {
        overrides = overrides.merged_with(&ProfileOverrides::load(path)?);
    }
    overrides = overrides.merged_with(&cli_overrides(&cli));

    // --- 2. Extraction ---
    let mut extractor = file.extractor.unwrap_or_default();
    if let Some(roi) = cli.roi {
        extractor.roi = Some(roi);
    }
    if let Some(downscale) = cli.downscale {
        extractor.downscale = downscale;
    }
    if let Some(step) = cli.search_step {
        extractor.search_step = step;
    }

    let stride = if sources.stride_from_cli {
        cli.stride
    } else {
        file.stride.unwrap_or(DEFAULT_STRIDE)
    };
    let fps = cli.fps.or(file.fps).unwrap_or(DEFAULT_FPS);
    let clock = SamplingClock::new(fps, stride)?;

    // --- 3. Time restrictions ---
    let trim = TrimPlan::new(
        cli.match_start.or(file.trim.match_start),
        cli.match_end.or(file.trim.match_end),
        &if cli.pauses.is_empty() { file.trim.pauses } else { cli.pauses.clone() },
    )?;

    let window = match (cli.window_start, cli.window_end) {
        (None, None) => None,
        (start, end) => Some(AnalysisWindow::new(start.unwrap_or(0.0), end.unwrap_or(f64::MAX))?),
    };
    let test_clip = (cli.test_mode || file.test_mode.enabled).then(|| TestClip {
        clip_seconds: cli
            .clip_seconds
            .or(file.test_mode.clip_seconds)
            .unwrap_or(DEFAULT_CLIP_SECONDS),
        seed: cli.seed.or(file.test_mode.seed),
    });
    if test_clip.is_some() && window.is_some() {
        bail!("--test-mode picks its own window; drop --window-start/--window-end");
    }
    if let Some(clip) = test_clip {
        if !clip.clip_seconds.is_finite() || clip.clip_seconds <= 0.0 {
            bail!("clip length must be greater than zero, got {}", clip.clip_seconds);
        }
    }

    let match_type = cli
        .match_type
        .or(file.match_type)
        .unwrap_or_else(|| MatchType::MenSingles.as_str().to_string());

    let templates = if sources.templates_from_cli {
        cli.templates
    } else {
        file.templates.unwrap_or(cli.templates)
    };
    let output_dir = if sources.output_dir_from_cli {
        cli.output_dir
    } else {
        file.output_dir.unwrap_or(cli.output_dir)
    };

    Ok(RunSettings {
        inputs: cli.inputs,
        pipeline: PipelineConfig {
            match_type,
            overrides,
            extractor,
            window,
            trim,
        },
        clock,
        templates,
        template: cli.template.or(file.template),
        template_roi: cli.template_roi.or(file.template_roi),
        test_clip,
        output_dir,
        dump_frames: cli.dump_frames,
        timeline: cli.timeline,
        jobs: cli.jobs.or(file.jobs),
        save_template: cli.save_template,
    })
}

fn cli_overrides(cli: &CliArgs) -> ProfileOverrides {
    ProfileOverrides {
        stability_threshold: cli.stability_threshold,
        movement_threshold: cli.movement_threshold,
        low_movement_threshold: cli.low_movement_threshold,
        min_rally_duration: cli.min_rally_duration,
        max_rally_duration: cli.max_rally_duration,
        max_merge_gap: cli.max_merge_gap,
        lookback_size: cli.lookback_size,
        allowed_low_movement_frames: cli.allowed_low_movement_frames,
        min_segment_frames: cli.min_segment_frames,
    }
}
