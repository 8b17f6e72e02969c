// THEORY:
// The stability signal asks one question per frame: "does this look like the usual
// gameplay camera?" We answer it by sliding a reference crop of the court over the
// frame and taking the best zero-mean normalized cross-correlation. A replay, a
// closeup or a broadcast graphic moves the court lines out of place and the score
// collapses; the regular wide shot scores near 1.
//
// The search runs coarse-to-fine: every `search_step`-th offset first, then a small
// exhaustive neighbourhood around the coarse winner. Templates can be kept in a
// `TemplateLibrary`, one per broadcast style, chosen by match type or by best fit.

use crate::core_modules::frame_sample::RegionOfInterest;
use crate::core_modules::frame_source::has_image_extension;
use crate::core_modules::profile::MatchType;
use crate::error::{RallyError, RallyResult};
use image::imageops::{self, FilterType};
use image::GrayImage;
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_TEMPLATE_NAME: &str = "gameplay_template_gray";

/// A grayscale crop of the expected court framing.
#[derive(Debug, Clone)]
pub struct ReferenceTemplate {
    name: String,
    image: GrayImage,
    /// Where in the frame to look for the template. `None` searches the whole frame.
    roi: Option<RegionOfInterest>,
    // Zero-mean pixel values and their norm, computed once.
    centered: Vec<f64>,
    norm: f64,
}

impl ReferenceTemplate {
    pub fn new(
        name: impl Into<String>,
        image: GrayImage,
        roi: Option<RegionOfInterest>,
    ) -> RallyResult<Self> {
        let name = name.into();
        if image.width() == 0 || image.height() == 0 {
            return Err(RallyError::TemplateUnavailable {
                path: PathBuf::from(&name),
                reason: "template image is empty".to_string(),
            });
        }
        let (centered, norm) = center(&image);
        Ok(Self {
            name,
            image,
            roi,
            centered,
            norm,
        })
    }

    pub fn load(path: &Path, roi: Option<RegionOfInterest>) -> RallyResult<Self> {
        let decoded = image::open(path).map_err(|err| RallyError::TemplateUnavailable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(name, decoded.to_luma8(), roi)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn roi(&self) -> Option<RegionOfInterest> {
        self.roi
    }

    pub fn with_roi(mut self, roi: Option<RegionOfInterest>) -> Self {
        self.roi = roi;
        self
    }

    /// Resizes the template (and its region) to match downscaled frames.
    pub fn downscaled(&self, factor: f32) -> RallyResult<Self> {
        if (factor - 1.0).abs() < f32::EPSILON {
            return Ok(self.clone());
        }
        let width = ((self.image.width() as f32 * factor).round() as u32).max(1);
        let height = ((self.image.height() as f32 * factor).round() as u32).max(1);
        let resized = imageops::resize(&self.image, width, height, FilterType::Triangle);
        Self::new(self.name.clone(), resized, self.roi.map(|roi| roi.scaled(factor)))
    }

    /// Best match confidence of this template anywhere inside its region of `frame`.
    pub fn score(&self, frame: &GrayImage, search_step: u32) -> f64 {
        match_score(frame, self, self.roi, search_step)
    }
}

fn center(image: &GrayImage) -> (Vec<f64>, f64) {
    let count = image.as_raw().len() as f64;
    let mean = image.as_raw().iter().map(|&p| p as f64).sum::<f64>() / count;
    let centered: Vec<f64> = image.as_raw().iter().map(|&p| p as f64 - mean).collect();
    let norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
    (centered, norm)
}

/// Normalized cross-correlation of the template against `frame`, maximised over every
/// placement inside `region` (the whole frame when `None`). Returns a value in [0, 1].
///
/// Frames smaller than the template, or regions that miss the frame, score 0.
pub fn match_score(
    frame: &GrayImage,
    template: &ReferenceTemplate,
    region: Option<RegionOfInterest>,
    search_step: u32,
) -> f64 {
    let region = match region {
        Some(roi) => roi.clamp_to(frame.width(), frame.height()),
        None => Some(RegionOfInterest::full(frame.width(), frame.height())),
    };
    let Some(region) = region else {
        return 0.0;
    };

    let (tw, th) = template.image.dimensions();
    if region.width < tw || region.height < th {
        return 0.0;
    }
    let max_dx = region.width - tw;
    let max_dy = region.height - th;
    let step = search_step.max(1);

    // --- 1. Coarse scan ---
    let mut best = (f64::MIN, 0u32, 0u32);
    let mut dy = 0;
    while dy <= max_dy {
        let mut dx = 0;
        while dx <= max_dx {
            let score = correlation_at(frame, template, region.x + dx, region.y + dy);
            if score > best.0 {
                best = (score, dx, dy);
            }
            dx += step;
        }
        dy += step;
    }

    // --- 2. Refine around the coarse winner ---
    if step > 1 {
        let (_, cx, cy) = best;
        let x_range = cx.saturating_sub(step - 1)..=(cx + step - 1).min(max_dx);
        let y_range = cy.saturating_sub(step - 1)..=(cy + step - 1).min(max_dy);
        for dy in y_range {
            for dx in x_range.clone() {
                let score = correlation_at(frame, template, region.x + dx, region.y + dy);
                if score > best.0 {
                    best = (score, dx, dy);
                }
            }
        }
    }

    best.0.clamp(0.0, 1.0)
}

fn correlation_at(frame: &GrayImage, template: &ReferenceTemplate, x: u32, y: u32) -> f64 {
    let (tw, th) = template.image.dimensions();
    let frame_width = frame.width() as usize;
    let raw = frame.as_raw();

    let mut sum = 0.0;
    for row in 0..th as usize {
        let start = (y as usize + row) * frame_width + x as usize;
        sum += raw[start..start + tw as usize].iter().map(|&p| p as f64).sum::<f64>();
    }
    let mean = sum / template.centered.len() as f64;

    let mut cross = 0.0;
    let mut energy = 0.0;
    for row in 0..th as usize {
        let start = (y as usize + row) * frame_width + x as usize;
        let window = &raw[start..start + tw as usize];
        let centered = &template.centered[row * tw as usize..(row + 1) * tw as usize];
        for (&pixel, &t) in window.iter().zip(centered) {
            let f = pixel as f64 - mean;
            cross += f * t;
            energy += f * f;
        }
    }

    let denominator = energy.sqrt() * template.norm;
    // A flat window or a flat template carries no framing information.
    if denominator <= f64::EPSILON {
        return 0.0;
    }
    cross / denominator
}

/// A set of named reference templates, one per broadcast style.
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    dir: Option<PathBuf>,
    templates: BTreeMap<String, ReferenceTemplate>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every image under `dir` as a template keyed by file stem. A missing
    /// directory yields an empty library.
    pub fn load(dir: &Path) -> RallyResult<Self> {
        let mut library = Self {
            dir: Some(dir.to_path_buf()),
            templates: BTreeMap::new(),
        };
        if !dir.is_dir() {
            debug!("template directory {} does not exist", dir.display());
            return Ok(library);
        }

        let entries = std::fs::read_dir(dir).map_err(|source| RallyError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let path = entry
                .map_err(|source| RallyError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            if path.is_file() && has_image_extension(&path) {
                let template = ReferenceTemplate::load(&path, None)?;
                library.insert(template);
            }
        }
        info!("loaded {} reference template(s) from {}", library.len(), dir.display());
        Ok(library)
    }

    pub fn insert(&mut self, template: ReferenceTemplate) {
        self.templates.insert(template.name().to_string(), template);
    }

    pub fn get(&self, name: &str) -> Option<&ReferenceTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn default_template(&self) -> Option<&ReferenceTemplate> {
        self.get(DEFAULT_TEMPLATE_NAME)
    }

    /// Template named after the match type, else the default, else the first by name.
    pub fn template_for(&self, match_type: MatchType) -> RallyResult<&ReferenceTemplate> {
        self.get(match_type.as_str())
            .or_else(|| self.default_template())
            .or_else(|| self.templates.values().next())
            .ok_or_else(|| RallyError::TemplateUnavailable {
                path: self.dir.clone().unwrap_or_default(),
                reason: "template library is empty".to_string(),
            })
    }

    /// Scores every template against `frame` and returns the best one with its score.
    pub fn best_match(
        &self,
        frame: &GrayImage,
        search_step: u32,
    ) -> Option<(&ReferenceTemplate, f64)> {
        self.templates
            .values()
            .map(|template| (template, template.score(frame, search_step)))
            .fold(None, |best: Option<(&ReferenceTemplate, f64)>, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            })
    }

    /// Stores a frame as a new template, writing it to the library directory when there is one.
    pub fn add_from_frame(
        &mut self,
        name: &str,
        frame: GrayImage,
    ) -> RallyResult<&ReferenceTemplate> {
        if let Some(dir) = &self.dir {
            std::fs::create_dir_all(dir).map_err(|source| RallyError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = dir.join(format!("{name}.png"));
            frame.save(&path).map_err(|err| RallyError::TemplateUnavailable {
                path: path.clone(),
                reason: err.to_string(),
            })?;
            info!("saved new template {}", path.display());
        }
        self.insert(ReferenceTemplate::new(name, frame, None)?);
        self.get(name).ok_or_else(|| RallyError::TemplateUnavailable {
            path: PathBuf::from(name),
            reason: "template was not stored".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn textured(width: u32, height: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            Luma([((x * 37 + y * 91 + seed * 13 + (x * y) % 17) % 251) as u8])
        })
    }

    #[test]
    fn exact_crop_scores_one() {
        let frame = textured(64, 48, 1);
        let crop = imageops::crop_imm(&frame, 20, 10, 16, 12).to_image();
        let template = ReferenceTemplate::new("court", crop, None).unwrap();
        let score = template.score(&frame, 1);
        assert!((score - 1.0).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn coarse_search_still_finds_an_off_grid_crop() {
        // A single smooth bump keeps the correlation surface unimodal.
        let frame = GrayImage::from_fn(64, 48, |x, y| {
            let dx = x as f64 - 29.0;
            let dy = y as f64 - 19.0;
            Luma([(40.0 + 200.0 * (-(dx * dx + dy * dy) / 60.0).exp()) as u8])
        });
        let crop = imageops::crop_imm(&frame, 21, 13, 16, 12).to_image();
        let template = ReferenceTemplate::new("court", crop, None).unwrap();
        let score = template.score(&frame, 4);
        assert!((score - 1.0).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn flat_frame_scores_zero() {
        let frame = GrayImage::from_pixel(32, 32, Luma([128]));
        let template = ReferenceTemplate::new("court", textured(8, 8, 3), None).unwrap();
        assert_eq!(template.score(&frame, 1), 0.0);
    }

    #[test]
    fn frame_smaller_than_template_scores_zero() {
        let template = ReferenceTemplate::new("court", textured(16, 16, 3), None).unwrap();
        assert_eq!(template.score(&textured(8, 8, 3), 1), 0.0);
    }

    #[test]
    fn empty_template_is_rejected() {
        let err = ReferenceTemplate::new("court", GrayImage::new(0, 0), None).unwrap_err();
        assert!(matches!(err, RallyError::TemplateUnavailable { .. }));
    }

    #[test]
    fn library_falls_back_to_the_default_template() {
        let mut library = TemplateLibrary::new();
        assert!(library.template_for(MatchType::MenSingles).is_err());

        library.insert(ReferenceTemplate::new("broadcast_a", textured(8, 8, 1), None).unwrap());
        assert_eq!(library.template_for(MatchType::MenSingles).unwrap().name(), "broadcast_a");

        let fallback = ReferenceTemplate::new(DEFAULT_TEMPLATE_NAME, textured(8, 8, 2), None);
        library.insert(fallback.unwrap());
        assert_eq!(
            library.template_for(MatchType::MenSingles).unwrap().name(),
            DEFAULT_TEMPLATE_NAME
        );

        library.insert(ReferenceTemplate::new("men_singles", textured(8, 8, 3), None).unwrap());
        assert_eq!(library.template_for(MatchType::MenSingles).unwrap().name(), "men_singles");
        assert_eq!(
            library.template_for(MatchType::MixedDoubles).unwrap().name(),
            DEFAULT_TEMPLATE_NAME
        );
    }

    #[test]
    fn best_match_picks_the_template_cut_from_the_frame() {
        let frame = textured(64, 48, 5);
        let mut library = TemplateLibrary::new();
        library.insert(ReferenceTemplate::new("other", textured(12, 12, 40), None).unwrap());
        let cut = imageops::crop_imm(&frame, 5, 5, 12, 12).to_image();
        library.insert(ReferenceTemplate::new("this_one", cut, None).unwrap());
        let (best, score) = library.best_match(&frame, 1).unwrap();
        assert_eq!(best.name(), "this_one");
        assert!(score > 0.99);
    }

    #[test]
    fn templates_round_trip_through_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut library = TemplateLibrary::load(dir.path()).unwrap();
        assert!(library.is_empty());

        library.add_from_frame("men_doubles", textured(10, 10, 7)).unwrap();
        assert!(dir.path().join("men_doubles.png").is_file());

        let reloaded = TemplateLibrary::load(dir.path()).unwrap();
        assert_eq!(reloaded.names().collect::<Vec<_>>(), vec!["men_doubles"]);
        assert_eq!(reloaded.get("men_doubles").unwrap().image(), &textured(10, 10, 7));
    }
}
