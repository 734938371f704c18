//! Core types for inpainting operations

use crate::error::{InpaintError, Result};
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three model slots held by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    /// Point-prompted segmentation model
    #[serde(rename = "sam")]
    Segmenter,
    /// Mask-guided inpainting model used for removal
    #[serde(rename = "lama")]
    Inpainter,
    /// Text-and-mask-guided diffusion model used for fill and replace
    #[serde(rename = "stable_diffusion")]
    DiffusionFiller,
}

impl ModelKind {
    /// All kinds in reporting order
    pub const ALL: [ModelKind; 3] = [Self::Segmenter, Self::Inpainter, Self::DiffusionFiller];

    /// Name used in health reports, metrics labels and error messages
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Segmenter => "sam",
            Self::Inpainter => "lama",
            Self::DiffusionFiller => "stable_diffusion",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded RGB image, 8 bits per channel
///
/// Width and height are always non-zero. Stages never mutate a buffer they
/// were handed; they return a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    image: RgbImage,
}

impl PixelBuffer {
    /// Wrap an RGB image
    ///
    /// # Errors
    /// - Either dimension is zero
    pub fn from_rgb(image: RgbImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(InpaintError::invalid_input(format!(
                "Image dimensions must be non-zero, got {}x{}",
                image.width(),
                image.height()
            )));
        }
        Ok(Self { image })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// (width, height)
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    #[must_use]
    pub fn into_rgb(self) -> RgbImage {
        self.image
    }

    /// Copy into an (H, W, 3) array
    #[must_use]
    pub fn to_array(&self) -> Array3<u8> {
        let (w, h) = self.dimensions();
        Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
            self.image.get_pixel(x as u32, y as u32)[c]
        })
    }
}

/// Binary mask with the same dimensions as the image it applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    /// All-false mask
    #[must_use]
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel
    pub fn from_fn<F: FnMut(u32, u32) -> bool>(width: u32, height: u32, mut f: F) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Build a mask from row-major values
    ///
    /// # Errors
    /// - `data.len()` differs from `width * height`
    pub fn from_vec(width: u32, height: u32, data: Vec<bool>) -> Result<Self> {
        if data.len() != width as usize * height as usize {
            return Err(InpaintError::internal(format!(
                "Mask data length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// (width, height)
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Value at (x, y); out-of-range coordinates read as false
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Row-major values
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    /// Number of set pixels
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    /// Whether this mask can be applied to `image`
    #[must_use]
    pub fn matches(&self, image: &PixelBuffer) -> bool {
        self.dimensions() == image.dimensions()
    }

    /// Complement of this mask
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|v| !v).collect(),
        }
    }

    /// 8-bit greyscale rendering, 255 where set
    #[must_use]
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
    }
}

/// Candidate masks returned by one segmentation call, paired with their scores
#[derive(Debug, Clone)]
pub struct MaskCandidates {
    masks: Vec<Mask>,
    scores: Vec<f32>,
}

impl MaskCandidates {
    /// # Errors
    /// - No candidates, or mask and score counts differ
    pub fn new(masks: Vec<Mask>, scores: Vec<f32>) -> Result<Self> {
        if masks.is_empty() {
            return Err(InpaintError::internal("Segmenter returned no candidate masks"));
        }
        if masks.len() != scores.len() {
            return Err(InpaintError::internal(format!(
                "Segmenter returned {} masks but {} scores",
                masks.len(),
                scores.len()
            )));
        }
        Ok(Self { masks, scores })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    #[must_use]
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    #[must_use]
    pub fn masks(&self) -> &[Mask] {
        &self.masks
    }

    /// Index of the highest score; the first one wins on ties and NaN never wins
    #[must_use]
    pub fn best_index(&self) -> usize {
        let mut best = 0;
        for (i, score) in self.scores.iter().enumerate().skip(1) {
            let current = self.scores.get(best).copied().unwrap_or(f32::NAN);
            if *score > current || (current.is_nan() && !score.is_nan()) {
                best = i;
            }
        }
        best
    }

    /// Consume the candidates and keep the best one with its index and score
    #[must_use]
    pub fn into_best(mut self) -> (usize, f32, Mask) {
        let index = self.best_index();
        let score = self.scores.get(index).copied().unwrap_or(f32::NAN);
        let mask = self.masks.swap_remove(index);
        (index, score, mask)
    }
}

/// A single (x, y) point prompt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromptPoint {
    pub x: f32,
    pub y: f32,
    /// true for foreground (label 1), false for background (label 0)
    pub foreground: bool,
}

/// Validated point prompts, non-empty and in bounds of the image they were checked against
#[derive(Debug, Clone, PartialEq)]
pub struct PointPrompts {
    points: Vec<PromptPoint>,
}

impl PointPrompts {
    pub(crate) fn from_validated(points: Vec<PromptPoint>) -> Self {
        Self { points }
    }

    #[must_use]
    pub fn points(&self) -> &[PromptPoint] {
        &self.points
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// First foreground point, falling back to the first point
    #[must_use]
    pub fn anchor(&self) -> Option<PromptPoint> {
        self.points
            .iter()
            .find(|p| p.foreground)
            .or_else(|| self.points.first())
            .copied()
    }

    /// Row-major `[x, y]` coordinates
    #[must_use]
    pub fn coords(&self) -> Vec<[f32; 2]> {
        self.points.iter().map(|p| [p.x, p.y]).collect()
    }

    /// Labels as 0/1
    #[must_use]
    pub fn labels(&self) -> Vec<u8> {
        self.points.iter().map(|p| u8::from(p.foreground)).collect()
    }
}

/// Sanitized, non-empty text prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPrompt(String);

impl TextPrompt {
    pub(crate) fn from_sanitized(value: String) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TextPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stage timings in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub validation_ms: u64,
    pub segmentation_ms: u64,
    pub dilation_ms: u64,
    pub terminal_ms: u64,
    pub total_ms: u64,
}

/// Output of one pipeline run
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub result: PixelBuffer,
    pub mask: Mask,
    /// Index and score of the candidate mask that was selected
    pub selected_index: usize,
    pub selected_score: f32,
    pub timings: ProcessingTimings,
    /// Wall time of the whole run in seconds
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with(width: u32, height: u32, set: &[(u32, u32)]) -> Mask {
        Mask::from_fn(width, height, |x, y| set.contains(&(x, y)))
    }

    #[test]
    fn test_pixel_buffer_rejects_empty() {
        assert!(PixelBuffer::from_rgb(RgbImage::new(0, 10)).is_err());
        assert!(PixelBuffer::from_rgb(RgbImage::new(10, 0)).is_err());
        let buffer = PixelBuffer::from_rgb(RgbImage::new(4, 3)).unwrap();
        assert_eq!(buffer.dimensions(), (4, 3));
    }

    #[test]
    fn test_pixel_buffer_array_layout() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 1, image::Rgb([10, 20, 30]));
        let array = PixelBuffer::from_rgb(image).unwrap().to_array();
        assert_eq!(array.shape(), &[2, 3, 3]);
        assert_eq!(array[[1, 2, 0]], 10);
        assert_eq!(array[[1, 2, 2]], 30);
    }

    #[test]
    fn test_mask_accessors() {
        let mask = mask_with(4, 3, &[(1, 1), (3, 2)]);
        assert!(mask.get(1, 1));
        assert!(mask.get(3, 2));
        assert!(!mask.get(0, 0));
        assert!(!mask.get(10, 10));
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.inverted().count(), 10);

        let luma = mask.to_luma();
        assert_eq!(luma.get_pixel(1, 1)[0], 255);
        assert_eq!(luma.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_mask_from_vec_checks_length() {
        assert!(Mask::from_vec(2, 2, vec![true; 3]).is_err());
        assert!(Mask::from_vec(2, 2, vec![true; 4]).is_ok());
    }

    #[test]
    fn test_best_index_picks_maximum() {
        let masks = vec![Mask::empty(2, 2); 3];
        let candidates = MaskCandidates::new(masks, vec![0.2, 0.9, 0.5]).unwrap();
        assert_eq!(candidates.best_index(), 1);
    }

    #[test]
    fn test_best_index_first_on_tie() {
        let masks = vec![Mask::empty(2, 2); 4];
        let candidates = MaskCandidates::new(masks, vec![0.1, 0.7, 0.7, 0.3]).unwrap();
        assert_eq!(candidates.best_index(), 1);

        let masks = vec![Mask::empty(2, 2); 3];
        let candidates = MaskCandidates::new(masks, vec![0.5, 0.5, 0.5]).unwrap();
        assert_eq!(candidates.best_index(), 0);
    }

    #[test]
    fn test_best_index_ignores_nan() {
        let masks = vec![Mask::empty(2, 2); 3];
        let candidates = MaskCandidates::new(masks, vec![f32::NAN, 0.1, 0.05]).unwrap();
        assert_eq!(candidates.best_index(), 1);
    }

    #[test]
    fn test_into_best_returns_selected_mask() {
        let masks = vec![
            mask_with(2, 2, &[(0, 0)]),
            mask_with(2, 2, &[(1, 1)]),
            mask_with(2, 2, &[(0, 1)]),
        ];
        let candidates = MaskCandidates::new(masks, vec![0.3, 0.3, 0.8]).unwrap();
        let (index, score, mask) = candidates.into_best();
        assert_eq!(index, 2);
        assert!((score - 0.8).abs() < f32::EPSILON);
        assert!(mask.get(0, 1));
    }

    #[test]
    fn test_candidates_shape_checks() {
        assert!(MaskCandidates::new(vec![], vec![]).is_err());
        assert!(MaskCandidates::new(vec![Mask::empty(1, 1)], vec![0.1, 0.2]).is_err());
    }

    #[test]
    fn test_model_kind_names() {
        assert_eq!(ModelKind::Segmenter.to_string(), "sam");
        assert_eq!(
            serde_json::to_string(&ModelKind::DiffusionFiller).unwrap(),
            "\"stable_diffusion\""
        );
    }
}
