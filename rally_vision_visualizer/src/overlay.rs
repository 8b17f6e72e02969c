// THEORY:
// Two pictures explain a segmentation run at a glance:
//   - a per-frame panel: label colour, stability bar with its threshold, movement bar
//     with its threshold, and whether a rally is open;
//   - a whole-run timeline: one column per slice of frames, with the final rallies
//     drawn underneath.
// Both are plain RGB images so callers can encode them however they like.

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use rally_vision::core_modules::debug_sink::FrameDebug;
use rally_vision::{FrameLabel, ParameterProfile, RallySegment};

pub const PANEL_WIDTH: u32 = 320;
pub const PANEL_HEIGHT: u32 = 64;

const TIMELINE_BAND: u32 = 30;
const SEGMENT_BAND: u32 = 10;

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);
const MARKER: Rgb<u8> = Rgb([255, 255, 255]);
const BAR: Rgb<u8> = Rgb([90, 160, 255]);
const RALLY: Rgb<u8> = Rgb([255, 215, 0]);

pub fn label_color(label: FrameLabel) -> Rgb<u8> {
    match label {
        FrameLabel::Active => Rgb([40, 180, 70]),
        FrameLabel::LowMovement => Rgb([230, 150, 30]),
        FrameLabel::Unstable => Rgb([200, 40, 40]),
    }
}

/// Scales used to turn raw scores into bar lengths.
#[derive(Debug, Clone, Copy)]
pub struct OverlayScale {
    pub stability_threshold: f64,
    /// Movement is drawn so that this value lands in the middle of the bar.
    pub movement_threshold: f64,
}

impl From<&ParameterProfile> for OverlayScale {
    fn from(profile: &ParameterProfile) -> Self {
        Self {
            stability_threshold: profile.stability_threshold,
            movement_threshold: profile.movement_threshold,
        }
    }
}

impl OverlayScale {
    fn stability_fraction(&self, value: f64) -> f64 {
        value.clamp(0.0, 1.0)
    }

    fn movement_fraction(&self, value: f64) -> f64 {
        if self.movement_threshold <= 0.0 {
            return 0.0;
        }
        (value / (2.0 * self.movement_threshold)).clamp(0.0, 1.0)
    }
}

fn fill_rect(image: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    let x_end = (x + width).min(image.width());
    let y_end = (y + height).min(image.height());
    for py in y..y_end {
        for px in x..x_end {
            image.put_pixel(px, py, color);
        }
    }
}

fn scaled(fraction: f64, length: u32) -> u32 {
    (fraction * length as f64).round() as u32
}

/// The diagnostic strip for one frame.
pub fn render_panel(frame: &FrameDebug, scale: &OverlayScale) -> RgbImage {
    let mut panel = RgbImage::from_pixel(PANEL_WIDTH, PANEL_HEIGHT, BACKGROUND);
    let bar_width = PANEL_WIDTH - PANEL_HEIGHT;
    let half = PANEL_HEIGHT / 2;

    // --- 1. Stability, top half ---
    let stability = scaled(scale.stability_fraction(frame.stability_score), bar_width);
    fill_rect(&mut panel, 0, 4, stability, half - 8, BAR);
    let marker = scaled(scale.stability_fraction(scale.stability_threshold), bar_width);
    fill_rect(&mut panel, marker.min(bar_width - 1), 0, 1, half, MARKER);

    // --- 2. Movement, bottom half ---
    let movement = scaled(scale.movement_fraction(frame.movement_score), bar_width);
    fill_rect(&mut panel, 0, half + 4, movement, half - 8, BAR);
    fill_rect(&mut panel, bar_width / 2, half, 1, half, MARKER);

    // --- 3. Label swatch, with a rally marker inside ---
    fill_rect(&mut panel, bar_width, 0, PANEL_HEIGHT, PANEL_HEIGHT, label_color(frame.label));
    if frame.rally_open {
        let inset = PANEL_HEIGHT / 4;
        fill_rect(&mut panel, bar_width + inset, inset, half, half, RALLY);
    }

    panel
}

/// A whole-run overview: label band, stability band, movement band and rallies.
pub fn render_timeline(
    frames: &[FrameDebug],
    segments: &[RallySegment],
    scale: &OverlayScale,
    width: u32,
) -> RgbImage {
    let height = TIMELINE_BAND * 3 + SEGMENT_BAND;
    let width = width.max(1);
    let mut timeline = RgbImage::from_pixel(width, height, BACKGROUND);
    let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
        return timeline;
    };

    for column in 0..width {
        let position = (column as usize * frames.len()) / width as usize;
        let frame = &frames[position.min(frames.len() - 1)];

        fill_rect(&mut timeline, column, 0, 1, TIMELINE_BAND, label_color(frame.label));

        let stability = scaled(scale.stability_fraction(frame.stability_score), TIMELINE_BAND);
        fill_rect(&mut timeline, column, 2 * TIMELINE_BAND - stability, 1, stability, BAR);

        let movement = scaled(scale.movement_fraction(frame.movement_score), TIMELINE_BAND);
        fill_rect(&mut timeline, column, 3 * TIMELINE_BAND - movement, 1, movement, BAR);
    }

    let start = first.timestamp;
    let span = (last.timestamp - start).max(f64::EPSILON);
    let to_column = |t: f64| (((t - start) / span) * width as f64).clamp(0.0, width as f64) as u32;
    for segment in segments {
        let x0 = to_column(segment.start_time());
        let x1 = to_column(segment.end_time()).max(x0 + 1);
        fill_rect(&mut timeline, x0, 3 * TIMELINE_BAND, x1 - x0, SEGMENT_BAND, RALLY);
    }

    timeline
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .context("failed to encode overlay as JPEG")?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(label: FrameLabel, timestamp: f64, rally_open: bool) -> FrameDebug {
        FrameDebug {
            index: (timestamp * 10.0) as u64,
            timestamp,
            label,
            minimal_movement: false,
            stability_score: 0.9,
            movement_score: 100.0,
            rally_open,
            low_movement_run: 0,
        }
    }

    fn scale() -> OverlayScale {
        OverlayScale {
            stability_threshold: 0.6,
            movement_threshold: 100.0,
        }
    }

    #[test]
    fn panel_shows_the_label_and_the_open_rally() {
        let panel = render_panel(&frame(FrameLabel::Unstable, 0.0, false), &scale());
        assert_eq!(panel.dimensions(), (PANEL_WIDTH, PANEL_HEIGHT));
        assert_eq!(*panel.get_pixel(PANEL_WIDTH - 1, 0), label_color(FrameLabel::Unstable));

        let open = render_panel(&frame(FrameLabel::Active, 0.0, true), &scale());
        let center = PANEL_WIDTH - PANEL_HEIGHT / 2;
        assert_eq!(*open.get_pixel(center, PANEL_HEIGHT / 2), RALLY);
        assert_eq!(*open.get_pixel(PANEL_WIDTH - 1, 0), label_color(FrameLabel::Active));
    }

    #[test]
    fn movement_at_threshold_fills_half_the_bar() {
        let panel = render_panel(&frame(FrameLabel::Active, 0.0, false), &scale());
        let bar_width = PANEL_WIDTH - PANEL_HEIGHT;
        let y = PANEL_HEIGHT / 2 + 8;
        assert_eq!(*panel.get_pixel(bar_width / 2 - 2, y), BAR);
        assert_eq!(*panel.get_pixel(bar_width / 2 + 2, y), BACKGROUND);
    }

    #[test]
    fn timeline_marks_rallies() {
        let frames: Vec<_> = (0..100)
            .map(|i| {
                let label = if i < 50 { FrameLabel::LowMovement } else { FrameLabel::Active };
                frame(label, i as f64 * 0.1, i >= 50)
            })
            .collect();
        let segments = [RallySegment::new(5.0, 9.9).unwrap()];
        let timeline = render_timeline(&frames, &segments, &scale(), 200);

        let bottom = timeline.height() - 1;
        assert_eq!(*timeline.get_pixel(10, bottom), BACKGROUND);
        assert_eq!(*timeline.get_pixel(150, bottom), RALLY);
        assert_eq!(*timeline.get_pixel(10, 0), label_color(FrameLabel::LowMovement));
        assert_eq!(*timeline.get_pixel(150, 0), label_color(FrameLabel::Active));
    }

    #[test]
    fn empty_run_renders_a_blank_timeline() {
        let timeline = render_timeline(&[], &[], &scale(), 50);
        assert_eq!(timeline.dimensions(), (50, TIMELINE_BAND * 3 + SEGMENT_BAND));
    }

    #[test]
    fn panels_encode_as_jpeg() {
        let panel = render_panel(&frame(FrameLabel::Active, 0.0, false), &scale());
        let bytes = encode_jpeg(&panel, 80).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
