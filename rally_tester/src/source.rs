use std::path::Path;

use anyhow::bail;
use rally_vision::{FrameSource, ImageSequenceSource, SamplingClock};

pub type BoxedSource = Box<dyn FrameSource + Send>;

/// A directory is read as an extracted frame sequence; anything else as a video file.
pub fn open_input(path: &Path, clock: SamplingClock) -> anyhow::Result<BoxedSource> {
    if path.is_dir() {
        let frames = ImageSequenceSource::open(path, clock)?;
        if frames.is_empty() {
            bail!("{} contains no frame images", path.display());
        }
        return Ok(Box::new(frames));
    }
    open_video(path, clock)
}

#[cfg(feature = "video")]
fn open_video(path: &Path, clock: SamplingClock) -> anyhow::Result<BoxedSource> {
    let video = crate::video::OpenCvSource::open(path, clock.stride(), clock.fps())?;
    Ok(Box::new(video))
}

#[cfg(not(feature = "video"))]
fn open_video(path: &Path, _clock: SamplingClock) -> anyhow::Result<BoxedSource> {
    bail!(
        "{} is not a frame directory; video files need the `video` feature",
        path.display()
    )
}

/// A short, file-system safe name for an input, unique among `taken`.
pub fn job_name(path: &Path, taken: &[String]) -> String {
    let base = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "input".to_string());
    let mut name = base.clone();
    let mut suffix = 2;
    while taken.contains(&name) {
        name = format!("{base}_{suffix}");
        suffix += 1;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn clock() -> SamplingClock {
        SamplingClock::new(25.0, 2).unwrap()
    }

    #[test]
    fn frame_directories_become_image_sequences() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            GrayImage::from_pixel(8, 8, Luma([i as u8 * 40]))
                .save(dir.path().join(format!("frame_{i:04}.png")))
                .unwrap();
        }
        let mut source = open_input(dir.path(), clock()).unwrap();
        assert_eq!(source.total_frames(), Some(6));
        assert_eq!(source.next_frame().unwrap().unwrap().index, 0);
        assert_eq!(source.next_frame().unwrap().unwrap().index, 2);
    }

    #[test]
    fn an_empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_input(dir.path(), clock()).is_err());
    }

    #[cfg(not(feature = "video"))]
    #[test]
    fn video_files_need_the_video_feature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("match.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        let err = match open_input(&path, clock()) {
            Ok(_) => panic!("a video file must be rejected without the video feature"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("video"));
    }

    #[test]
    fn job_names_are_unique() {
        let taken = vec!["final".to_string(), "final_2".to_string()];
        assert_eq!(job_name(Path::new("/videos/semi.mp4"), &taken), "semi");
        assert_eq!(job_name(Path::new("/other/final.mp4"), &taken), "final_3");
        assert_eq!(job_name(Path::new("/frames/final/"), &[]), "final");
    }
}
