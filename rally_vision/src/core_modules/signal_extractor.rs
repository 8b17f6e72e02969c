// THEORY:
// The `SignalExtractor` turns a stream of decoded frames into a stream of
// `FrameSample`s. It is a lazy, single-pass iterator: it pulls one frame from the
// source each time it is asked for a sample and keeps only the previous frame's
// region of interest around for the movement difference.
//
// Per frame it does three things, in order:
//   1. Downscale the frame (the template was downscaled once, up front).
//   2. Stability: template match confidence inside the template's region.
//   3. Movement: sum of absolute differences against the previous sampled frame,
//      over the same region of interest. The first sample has no predecessor and
//      reports 0.
//
// A source that fails, or that breaks index ordering, ends the stream. That is not
// an error for the caller; everything segmented so far stays valid.

use crate::core_modules::frame_sample::{FrameSample, RegionOfInterest, SamplingClock};
use crate::core_modules::frame_source::{FrameSource, SourceFrame};
use crate::core_modules::template::ReferenceTemplate;
use crate::error::{FrameSourceError, RallyError, RallyResult};
use image::imageops::{self, FilterType};
use image::GrayImage;
use log::warn;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DOWNSCALE: f32 = 0.5;
pub const DEFAULT_SEARCH_STEP: u32 = 2;

/// Tuning for how frames are measured. Independent of the match type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorOptions {
    /// Region, in original-frame pixels, the movement score is restricted to.
    /// Without one, movement uses the template's region, then the whole frame.
    /// The template match always uses the template's own region when it has one.
    pub roi: Option<RegionOfInterest>,
    /// Resize factor applied to frames and template before analysis, in (0, 1].
    pub downscale: f32,
    /// Stride of the coarse template search, in downscaled pixels.
    pub search_step: u32,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            roi: None,
            downscale: DEFAULT_DOWNSCALE,
            search_step: DEFAULT_SEARCH_STEP,
        }
    }
}

impl ExtractorOptions {
    pub fn validate(&self) -> RallyResult<()> {
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            return Err(RallyError::configuration(
                "downscale",
                format!("must be in (0, 1], got {}", self.downscale),
            ));
        }
        if self.search_step == 0 {
            return Err(RallyError::configuration("search_step", "must be at least 1"));
        }
        if let Some(roi) = self.roi {
            if roi.width == 0 || roi.height == 0 {
                return Err(RallyError::configuration("roi", "width and height must be non-zero"));
            }
        }
        Ok(())
    }
}

/// Lazily converts frames into `FrameSample`s.
pub struct SignalExtractor<S: FrameSource> {
    source: S,
    clock: SamplingClock,
    template: ReferenceTemplate,
    options: ExtractorOptions,
    /// Movement region in downscaled pixels.
    movement_roi: Option<RegionOfInterest>,
    previous_index: Option<u64>,
    previous_region: Option<GrayImage>,
    finished: bool,
}

impl<S: FrameSource> SignalExtractor<S> {
    /// Prepares the extractor. No frame is pulled until the first call to `next`.
    pub fn new(
        source: S,
        template: &ReferenceTemplate,
        options: ExtractorOptions,
    ) -> RallyResult<Self> {
        options.validate()?;
        let template = template.downscaled(options.downscale)?;
        let clock = source.clock();
        // The template's region is already in downscaled pixels.
        let movement_roi = options
            .roi
            .map(|roi| roi.scaled(options.downscale))
            .or(template.roi());
        Ok(Self {
            source,
            clock,
            template,
            movement_roi,
            options,
            previous_index: None,
            previous_region: None,
            finished: false,
        })
    }

    pub fn clock(&self) -> SamplingClock {
        self.clock
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.source.total_frames()
    }

    fn measure(&mut self, frame: SourceFrame) -> FrameSample {
        // --- 1. Downscale ---
        let image = downscale(&frame.image, self.options.downscale);

        // --- 2. Stability ---
        let stability = self.template.score(&image, self.options.search_step);

        // --- 3. Movement ---
        let region = self
            .movement_roi
            .unwrap_or_else(|| RegionOfInterest::full(image.width(), image.height()))
            .clamp_to(image.width(), image.height())
            .map(|roi| imageops::crop_imm(&image, roi.x, roi.y, roi.width, roi.height).to_image());

        let movement = match (&self.previous_region, &region) {
            (Some(previous), Some(current)) => sum_abs_diff(previous, current),
            _ => 0.0,
        };
        self.previous_region = region;

        FrameSample::new(frame.index, &self.clock, stability, movement)
    }

    fn stop(&mut self, err: FrameSourceError) {
        warn!("frame source stopped early: {err}");
        self.finished = true;
        self.previous_region = None;
    }
}

impl<S: FrameSource> Iterator for SignalExtractor<S> {
    type Item = FrameSample;

    fn next(&mut self) -> Option<FrameSample> {
        if self.finished {
            return None;
        }
        let frame = match self.source.next_frame() {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                self.stop(err);
                return None;
            }
            None => {
                self.finished = true;
                return None;
            }
        };

        if let Some(previous) = self.previous_index {
            if frame.index <= previous {
                self.stop(FrameSourceError::OutOfOrder {
                    previous,
                    got: frame.index,
                });
                return None;
            }
        }
        self.previous_index = Some(frame.index);

        Some(self.measure(frame))
    }
}

fn downscale(image: &GrayImage, factor: f32) -> GrayImage {
    if (factor - 1.0).abs() < f32::EPSILON {
        return image.clone();
    }
    let width = ((image.width() as f32 * factor).round() as u32).max(1);
    let height = ((image.height() as f32 * factor).round() as u32).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Sum of absolute 8-bit differences. Mismatched sizes score 0.
pub fn sum_abs_diff(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 0.0;
    }
    a.as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum::<u64>() as f64
}
