// THEORY:
// Every input gets its own directory under the output root:
//   - `segments.json`: the final rallies plus enough context to reproduce the run;
//   - `frames.jsonl`: one `FrameDebug` record per analysed sample (`--dump-frames`),
//     the same format the visualizer's replay binary reads;
//   - `timeline.png`: labels, both signals and the rallies on one strip (`--timeline`).

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use rally_vision::core_modules::analysis_window::AnalysisWindow;
use rally_vision::core_modules::trim_plan::TrimPlan;
use rally_vision::{FrameDebug, ParameterProfile, RallySegment, SamplingClock, SegmentationReport};
use rally_vision_visualizer::overlay::{OverlayScale, render_timeline};
use serde::Serialize;

pub const SEGMENTS_FILE: &str = "segments.json";
pub const FRAMES_FILE: &str = "frames.jsonl";
pub const TIMELINE_FILE: &str = "timeline.png";

const TIMELINE_WIDTH: u32 = 1600;

#[derive(Debug, Serialize)]
struct RallyRecord {
    start_time: f64,
    end_time: f64,
    duration: f64,
    /// Position on the timeline with the trimmed spans removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    trimmed_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trimmed_end: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    video: &'a str,
    match_type: &'a str,
    fps: f64,
    stride: u32,
    frames_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    window: Option<AnalysisWindow>,
    profile: &'a ParameterProfile,
    rallies: Vec<RallyRecord>,
}

/// Where one input's results go.
pub struct RunOutput<'a> {
    pub name: &'a str,
    pub clock: SamplingClock,
    pub window: Option<AnalysisWindow>,
    pub profile: &'a ParameterProfile,
    pub trim: &'a TrimPlan,
}

impl RunOutput<'_> {
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(self.name)
    }

    pub fn write_segments(
        &self,
        root: &Path,
        report: &SegmentationReport,
    ) -> anyhow::Result<PathBuf> {
        let dir = self.dir(root);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let rallies = report
            .segments
            .iter()
            .map(|segment| rally_record(segment, self.trim))
            .collect();
        let summary = RunSummary {
            video: self.name,
            match_type: self.profile.match_type.as_str(),
            fps: self.clock.fps(),
            stride: self.clock.stride(),
            frames_processed: report.frames_processed,
            window: self.window,
            profile: self.profile,
            rallies,
        };

        let path = dir.join(SEGMENTS_FILE);
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &summary)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn write_frames(&self, root: &Path, frames: &[FrameDebug]) -> anyhow::Result<PathBuf> {
        let path = self.dir(root).join(FRAMES_FILE);
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for frame in frames {
            serde_json::to_writer(&mut writer, frame)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(path)
    }

    pub fn write_timeline(
        &self,
        root: &Path,
        frames: &[FrameDebug],
        segments: &[RallySegment],
    ) -> anyhow::Result<PathBuf> {
        let path = self.dir(root).join(TIMELINE_FILE);
        let scale = OverlayScale::from(self.profile);
        let timeline = render_timeline(frames, segments, &scale, TIMELINE_WIDTH);
        timeline
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn rally_record(segment: &RallySegment, trim: &TrimPlan) -> RallyRecord {
    let (trimmed_start, trimmed_end) = if trim.is_identity() {
        (None, None)
    } else {
        (
            trim.map_timestamp(segment.start_time()),
            trim.map_end(segment.end_time()),
        )
    };
    RallyRecord {
        start_time: segment.start_time(),
        end_time: segment.end_time(),
        duration: segment.duration(),
        trimmed_start,
        trimmed_end,
    }
}

/// `h:mm:ss.s`, or `mm:ss.s` under an hour.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let whole_minutes = (seconds / 60.0).floor() as u64;
    let rest = seconds - whole_minutes as f64 * 60.0;
    let (hours, minutes) = (whole_minutes / 60, whole_minutes % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{rest:04.1}")
    } else {
        format!("{minutes:02}:{rest:04.1}")
    }
}
