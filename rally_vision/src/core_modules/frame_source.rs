// THEORY:
// Decoding video is somebody else's job. The engine only needs a forward-only,
// finite pull source of already-decoded grayscale frames, each tagged with its
// original frame number, delivered at a fixed stride. `FrameSource` is that seam.
//
// Two sources ship with the library: `VecFrameSource` for frames already in memory
// (tests, callers that decode elsewhere) and `ImageSequenceSource` for a directory
// of pre-extracted frame images. Video decoders live outside the library.

use crate::core_modules::frame_sample::SamplingClock;
use crate::error::{FrameSourceError, RallyError, RallyResult};
use image::GrayImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// One decoded, grayscale frame and its original-video frame number.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub index: u64,
    pub image: GrayImage,
}

impl SourceFrame {
    pub fn new(index: u64, image: GrayImage) -> Self {
        Self { index, image }
    }
}

/// A forward-only supply of decoded frames at a fixed sampling stride.
pub trait FrameSource {
    /// The clock describing this source's frame rate and stride.
    fn clock(&self) -> SamplingClock;

    /// Frame count of the original video, when the source knows it.
    fn total_frames(&self) -> Option<u64> {
        None
    }

    /// Pulls the next frame. `None` is end of stream; an error also ends the stream.
    fn next_frame(&mut self) -> Option<Result<SourceFrame, FrameSourceError>>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn clock(&self) -> SamplingClock {
        (**self).clock()
    }

    fn total_frames(&self) -> Option<u64> {
        (**self).total_frames()
    }

    fn next_frame(&mut self) -> Option<Result<SourceFrame, FrameSourceError>> {
        (**self).next_frame()
    }
}

/// Frames that are already decoded and held in memory.
pub struct VecFrameSource {
    clock: SamplingClock,
    total_frames: Option<u64>,
    frames: VecDeque<SourceFrame>,
}

impl VecFrameSource {
    pub fn new(clock: SamplingClock, frames: Vec<SourceFrame>) -> Self {
        let total_frames = frames.last().map(|frame| frame.index + clock.stride() as u64);
        Self {
            clock,
            total_frames,
            frames: frames.into(),
        }
    }

    /// Numbers the images `0, stride, 2*stride, ...` in the order given.
    pub fn from_images(clock: SamplingClock, images: Vec<GrayImage>) -> Self {
        let stride = clock.stride() as u64;
        let frames = images
            .into_iter()
            .enumerate()
            .map(|(i, image)| SourceFrame::new(i as u64 * stride, image))
            .collect();
        Self::new(clock, frames)
    }
}

impl FrameSource for VecFrameSource {
    fn clock(&self) -> SamplingClock {
        self.clock
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn next_frame(&mut self) -> Option<Result<SourceFrame, FrameSourceError>> {
        self.frames.pop_front().map(Ok)
    }
}

/// A directory of pre-extracted frame images, read in file-name order.
///
/// The n-th image is taken to be original frame `n * stride`.
pub struct ImageSequenceSource {
    clock: SamplingClock,
    paths: Vec<PathBuf>,
    position: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, clock: SamplingClock) -> RallyResult<Self> {
        let entries = std::fs::read_dir(dir).map_err(|source| RallyError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RallyError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(Self {
            clock,
            paths,
            position: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn clock(&self) -> SamplingClock {
        self.clock
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.paths.len() as u64 * self.clock.stride() as u64)
    }

    fn next_frame(&mut self) -> Option<Result<SourceFrame, FrameSourceError>> {
        let path = self.paths.get(self.position)?;
        let index = self.position as u64 * self.clock.stride() as u64;
        self.position += 1;

        let frame = image::open(path)
            .map(|decoded| SourceFrame::new(index, decoded.to_luma8()))
            .map_err(|err| FrameSourceError::Decode {
                index,
                reason: format!("{}: {err}", path.display()),
            });
        Some(frame)
    }
}

pub(crate) fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
