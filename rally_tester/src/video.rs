// THEORY:
// OpenCV decodes the video; the engine only ever sees grayscale `image` buffers.
// Frames between samples are grabbed but never retrieved or converted, which
// keeps a stride of N close to N times cheaper than decoding every frame.

use std::path::Path;

use anyhow::{Context, bail};
use image::GrayImage;
use log::warn;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use rally_vision::{FrameSource, FrameSourceError, SamplingClock, SourceFrame};

pub struct OpenCvSource {
    cap: VideoCapture,
    clock: SamplingClock,
    total_frames: Option<u64>,
    next_index: u64,
    finished: bool,
}

impl OpenCvSource {
    /// Opens a video file. `fallback_fps` is used when the container reports no frame rate.
    pub fn open(path: &Path, stride: u32, fallback_fps: f64) -> anyhow::Result<Self> {
        let name = path.to_string_lossy();
        let cap = VideoCapture::from_file(&name, videoio::CAP_ANY)
            .with_context(|| format!("failed to open video {name}"))?;
        if !cap.is_opened()? {
            bail!("could not open video {name}");
        }

        let reported_fps = cap.get(videoio::CAP_PROP_FPS)?;
        let fps = if reported_fps.is_finite() && reported_fps > 0.0 {
            reported_fps
        } else {
            warn!("{name} reports no frame rate, assuming {fallback_fps} fps");
            fallback_fps
        };
        let frame_count = cap.get(videoio::CAP_PROP_FRAME_COUNT)?;
        let total_frames =
            (frame_count.is_finite() && frame_count > 0.0).then_some(frame_count as u64);

        Ok(Self {
            cap,
            clock: SamplingClock::new(fps, stride)?,
            total_frames,
            next_index: 0,
            finished: false,
        })
    }

    fn decode_next(&mut self) -> Result<Option<GrayImage>, String> {
        let mut frame = Mat::default();
        if !self.cap.read(&mut frame).map_err(|err| err.to_string())? || frame.empty() {
            return Ok(None);
        }

        let mut gray = Mat::default();
        imgproc::cvt_color(&frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)
            .map_err(|err| err.to_string())?;
        let width = gray.cols() as u32;
        let height = gray.rows() as u32;
        let bytes = gray.data_bytes().map_err(|err| err.to_string())?.to_vec();
        GrayImage::from_raw(width, height, bytes)
            .map(Some)
            .ok_or_else(|| format!("frame buffer does not match {width}x{height}"))
    }

    /// Skips the frames between two samples without decoding them.
    fn skip(&mut self, count: u32) -> bool {
        for _ in 0..count {
            match self.cap.grab() {
                Ok(true) => {}
                _ => return false,
            }
        }
        true
    }
}

impl FrameSource for OpenCvSource {
    fn clock(&self) -> SamplingClock {
        self.clock
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn next_frame(&mut self) -> Option<Result<SourceFrame, FrameSourceError>> {
        if self.finished {
            return None;
        }
        let index = self.next_index;

        let decoded = match self.decode_next() {
            Ok(Some(image)) => image,
            Ok(None) => {
                self.finished = true;
                return None;
            }
            Err(reason) => {
                self.finished = true;
                return Some(Err(FrameSourceError::Decode { index, reason }));
            }
        };

        let stride = self.clock.stride();
        if !self.skip(stride - 1) {
            self.finished = true;
        }
        self.next_index += stride as u64;
        Some(Ok(SourceFrame::new(index, decoded)))
    }
}
