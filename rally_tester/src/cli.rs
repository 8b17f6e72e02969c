use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use rally_vision::RegionOfInterest;

/// Which defaulted flags were typed on the command line, so file values can win otherwise.
#[derive(Debug, Default)]
pub struct CliSources {
    pub stride_from_cli: bool,
    pub output_dir_from_cli: bool,
    pub templates_from_cli: bool,
}

impl CliSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            stride_from_cli: value_from_cli(matches, "stride"),
            output_dir_from_cli: value_from_cli(matches, "output_dir"),
            templates_from_cli: value_from_cli(matches, "templates"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    parse_from(std::env::args_os())
}

pub fn parse_from<I, T>(args: I) -> (CliArgs, CliSources)
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = CliArgs::command().get_matches_from(args);
    let args = match CliArgs::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let sources = CliSources::from_matches(&matches);
    (args, sources)
}

fn parse_roi(value: &str) -> Result<RegionOfInterest, String> {
    let parts: Vec<u32> = value
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|err| format!("expected x,y,width,height: {err}"))?;
    match parts.as_slice() {
        [x, y, width, height] if *width > 0 && *height > 0 => {
            Ok(RegionOfInterest::new(*x, *y, *width, *height))
        }
        _ => Err("expected x,y,width,height with non-zero size".to_string()),
    }
}

fn parse_span(value: &str) -> Result<(f64, f64), String> {
    let (start, end) = value
        .split_once('-')
        .ok_or_else(|| "expected START-END in seconds".to_string())?;
    let start: f64 = start.trim().parse().map_err(|err| format!("bad start: {err}"))?;
    let end: f64 = end.trim().parse().map_err(|err| format!("bad end: {err}"))?;
    Ok((start, end))
}

#[derive(Debug, Parser)]
#[command(
    name = "rally_tester",
    about = "Find the rallies in badminton recordings",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Frame directories (or video files, with the `video` feature) to segment
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Override the configuration file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Match type: men_singles, women_singles, men_doubles, women_doubles, mixed_doubles
    #[arg(short = 'm', long = "match-type")]
    pub match_type: Option<String>,

    /// TOML file of profile threshold overrides
    #[arg(long = "overrides", value_name = "FILE")]
    pub overrides: Option<PathBuf>,

    #[arg(long = "stability-threshold")]
    pub stability_threshold: Option<f64>,

    #[arg(long = "movement-threshold")]
    pub movement_threshold: Option<f64>,

    #[arg(long = "low-movement-threshold")]
    pub low_movement_threshold: Option<f64>,

    /// Shortest rally kept, in seconds
    #[arg(long = "min-rally")]
    pub min_rally_duration: Option<f64>,

    /// Longest rally before it is split, in seconds
    #[arg(long = "max-rally")]
    pub max_rally_duration: Option<f64>,

    /// Largest gap merged across, in seconds
    #[arg(long = "merge-gap")]
    pub max_merge_gap: Option<f64>,

    #[arg(long = "lookback")]
    pub lookback_size: Option<usize>,

    #[arg(long = "allowed-low-movement")]
    pub allowed_low_movement_frames: Option<u32>,

    #[arg(long = "min-segment-frames")]
    pub min_segment_frames: Option<u32>,

    /// Frame rate of image-sequence inputs
    #[arg(long = "fps")]
    pub fps: Option<f64>,

    /// Analyse every Nth frame of the original video
    #[arg(
        long = "stride",
        id = "stride",
        default_value_t = rally_vision::core_modules::frame_sample::DEFAULT_STRIDE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub stride: u32,

    /// Directory of reference court templates
    #[arg(long = "templates", id = "templates", default_value = "templates")]
    pub templates: PathBuf,

    /// Use this template image instead of picking one from the template directory
    #[arg(long = "template", value_name = "FILE")]
    pub template: Option<PathBuf>,

    /// Where the template is searched for, as x,y,width,height in frame pixels
    #[arg(long = "template-roi", value_parser = parse_roi)]
    pub template_roi: Option<RegionOfInterest>,

    /// Restrict the movement score to x,y,width,height in frame pixels
    #[arg(long = "roi", value_parser = parse_roi)]
    pub roi: Option<RegionOfInterest>,

    #[arg(long = "downscale")]
    pub downscale: Option<f32>,

    #[arg(long = "search-step")]
    pub search_step: Option<u32>,

    /// Analyse a random clip of each input instead of the whole recording
    #[arg(long = "test-mode")]
    pub test_mode: bool,

    #[arg(long = "clip-seconds")]
    pub clip_seconds: Option<f64>,

    /// Seed for the test-mode clip choice
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Analyse only from this time on, in seconds
    #[arg(long = "window-start")]
    pub window_start: Option<f64>,

    /// Analyse only up to this time, in seconds
    #[arg(long = "window-end")]
    pub window_end: Option<f64>,

    /// When the match starts, in seconds
    #[arg(long = "match-start")]
    pub match_start: Option<f64>,

    /// When the match ends, in seconds
    #[arg(long = "match-end")]
    pub match_end: Option<f64>,

    /// A break to ignore, as START-END in seconds (repeatable)
    #[arg(long = "pause", value_parser = parse_span)]
    pub pauses: Vec<(f64, f64)>,

    /// Output directory, one sub-directory per input
    #[arg(short = 'o', long = "output-dir", id = "output_dir", default_value = "rally_output")]
    pub output_dir: PathBuf,

    /// Write per-frame diagnostics as frames.jsonl
    #[arg(long = "dump-frames")]
    pub dump_frames: bool,

    /// Render a timeline.png overview of each run
    #[arg(long = "timeline")]
    pub timeline: bool,

    /// How many inputs to segment at once (defaults to the number of cores)
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// Save the first frame of the first input as a new template with this name, then exit
    #[arg(long = "save-template", value_name = "NAME")]
    pub save_template: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_regions_and_spans() {
        assert_eq!(parse_roi("10, 20,300,40"), Ok(RegionOfInterest::new(10, 20, 300, 40)));
        assert!(parse_roi("10,20,0,40").is_err());
        assert!(parse_roi("10,20").is_err());
        assert_eq!(parse_span("1200-1320.5"), Ok((1200.0, 1320.5)));
        assert!(parse_span("1200").is_err());
    }

    #[test]
    fn defaults_are_not_counted_as_cli_values() {
        let (args, sources) = parse_from(["rally_tester", "frames/"]);
        assert_eq!(args.stride, 2);
        assert!(!sources.stride_from_cli);
        assert!(!sources.output_dir_from_cli);

        let (args, sources) =
            parse_from(["rally_tester", "frames/", "--stride", "3", "--pause", "10-20"]);
        assert_eq!(args.stride, 3);
        assert!(sources.stride_from_cli);
        assert_eq!(args.pauses, vec![(10.0, 20.0)]);
    }
}
