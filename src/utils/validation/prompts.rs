//! Point and text prompt validation
//!
//! Pure checks with no I/O. Structural checks can run before the image is
//! decoded; bounds checks need the decoded dimensions.

use super::NumericValidator;
use crate::error::{InpaintError, Result};
use crate::types::{PointPrompts, PromptPoint, TextPrompt};

/// Largest accepted dilation kernel size
pub const MAX_DILATE_KERNEL: u32 = 50;
/// Accepted range for diffusion steps
pub const INFERENCE_STEPS_RANGE: (u32, u32) = (10, 150);
/// Steps used when a replace request does not specify any
pub const DEFAULT_INFERENCE_STEPS: u32 = 50;
/// Maximum prompt length in characters, after trimming
pub const MAX_PROMPT_CHARS: usize = 1000;

/// Characters removed from text prompts for display hygiene
const STRIPPED_PROMPT_CHARS: [char; 4] = ['<', '>', '"', '\''];

/// Validator for request prompts
pub struct PromptValidator;

impl PromptValidator {
    /// Check shape and label invariants that do not depend on the image
    ///
    /// # Errors
    /// - Empty coordinate or label lists, or lists of different length
    /// - A coordinate that is not exactly `[x, y]`, not finite, or negative
    /// - A label other than 0 or 1
    pub fn check_structure(coords: &[Vec<f64>], labels: &[i64]) -> Result<()> {
        if coords.is_empty() {
            return Err(InpaintError::invalid_input("point_coords cannot be empty"));
        }
        if labels.is_empty() {
            return Err(InpaintError::invalid_input("point_labels cannot be empty"));
        }
        if coords.len() != labels.len() {
            return Err(InpaintError::invalid_input(format!(
                "Number of labels ({}) must match number of coordinates ({})",
                labels.len(),
                coords.len()
            )));
        }

        for (i, coord) in coords.iter().enumerate() {
            let [x, y] = coord.as_slice() else {
                return Err(InpaintError::invalid_input(format!(
                    "Point coordinate {i} must have exactly 2 values [x, y]"
                )));
            };
            NumericValidator::validate_finite(*x, &format!("Point coordinate {i} x"))?;
            NumericValidator::validate_finite(*y, &format!("Point coordinate {i} y"))?;
            if *x < 0.0 || *y < 0.0 {
                return Err(InpaintError::invalid_input(format!(
                    "Point coordinate {i} values must be non-negative"
                )));
            }
        }

        for (i, label) in labels.iter().enumerate() {
            if !matches!(label, 0 | 1) {
                return Err(InpaintError::invalid_input(format!(
                    "Point label {i} must be 0 or 1, got {label}"
                )));
            }
        }

        Ok(())
    }

    /// Full validation against an image of `width` x `height`
    ///
    /// Coordinates on the far edge (`x == width`, `y == height`) are accepted.
    ///
    /// # Errors
    /// - Anything rejected by [`Self::check_structure`]
    /// - A point outside `[0, width] x [0, height]`
    pub fn validate_points(
        coords: &[Vec<f64>],
        labels: &[i64],
        width: u32,
        height: u32,
    ) -> Result<PointPrompts> {
        Self::check_structure(coords, labels)?;

        let mut points = Vec::with_capacity(coords.len());
        for (i, (coord, label)) in coords.iter().zip(labels).enumerate() {
            let (x, y) = match coord.as_slice() {
                [x, y] => (*x, *y),
                _ => return Err(InpaintError::internal("coordinate shape changed")),
            };
            if x > f64::from(width) || y > f64::from(height) {
                return Err(InpaintError::invalid_input(format!(
                    "Point coordinate {i} ({x}, {y}) is outside image bounds {width}x{height}"
                )));
            }
            points.push(PromptPoint {
                x: x as f32,
                y: y as f32,
                foreground: *label == 1,
            });
        }

        Ok(PointPrompts::from_validated(points))
    }

    /// Trim, bound and sanitize a text prompt
    ///
    /// Removal of `<>"'` is cosmetic; the result must still be treated as
    /// untrusted text anywhere it is interpolated.
    ///
    /// # Errors
    /// - Empty or whitespace-only prompt
    /// - More than 1000 characters after trimming
    /// - Nothing left after sanitization
    pub fn validate_text_prompt(raw: &str) -> Result<TextPrompt> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InpaintError::invalid_input(
                "text_prompt cannot be empty or only whitespace",
            ));
        }
        let length = trimmed.chars().count();
        if length > MAX_PROMPT_CHARS {
            return Err(InpaintError::invalid_input(format!(
                "text_prompt must be at most {MAX_PROMPT_CHARS} characters, got {length}"
            )));
        }

        let cleaned: String = trimmed
            .chars()
            .filter(|c| !STRIPPED_PROMPT_CHARS.contains(c))
            .collect();
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return Err(InpaintError::invalid_input(
                "text_prompt must contain valid characters",
            ));
        }

        Ok(TextPrompt::from_sanitized(cleaned.to_string()))
    }

    /// Validate an optional dilation kernel size; `0` and absent both mean no dilation
    ///
    /// # Errors
    /// - Negative or above 50
    pub fn validate_dilate_kernel(size: Option<i64>) -> Result<Option<u32>> {
        match size {
            None => Ok(None),
            Some(k) => {
                let k = NumericValidator::validate_range(
                    k,
                    0,
                    i64::from(MAX_DILATE_KERNEL),
                    "dilate_kernel_size",
                )?;
                Ok(u32::try_from(k).ok().filter(|k| *k > 0))
            },
        }
    }

    /// Validate diffusion steps, defaulting to 50
    ///
    /// # Errors
    /// - Outside `[10, 150]`
    pub fn validate_inference_steps(steps: Option<i64>) -> Result<u32> {
        let Some(steps) = steps else {
            return Ok(DEFAULT_INFERENCE_STEPS);
        };
        let (min, max) = INFERENCE_STEPS_RANGE;
        let steps = NumericValidator::validate_range(
            steps,
            i64::from(min),
            i64::from(max),
            "num_inference_steps",
        )?;
        u32::try_from(steps).map_err(|_| InpaintError::internal("step count overflow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(points: &[(f64, f64)]) -> Vec<Vec<f64>> {
        points.iter().map(|(x, y)| vec![*x, *y]).collect()
    }

    #[test]
    fn test_valid_points() {
        let points = coords(&[(100.0, 75.0), (0.0, 0.0)]);
        let prompts = PromptValidator::validate_points(&points, &[1, 0], 200, 150).unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts.points()[0].foreground);
        assert!(!prompts.points()[1].foreground);
        assert_eq!(prompts.labels(), vec![1, 0]);
    }

    #[test]
    fn test_far_edge_is_inside() {
        let check = |x, y| PromptValidator::validate_points(&coords(&[(x, y)]), &[1], 200, 150);
        assert!(check(200.0, 150.0).is_ok());
        assert!(check(200.5, 10.0).is_err());
        assert!(check(10.0, 151.0).is_err());
    }

    #[test]
    fn test_each_structural_violation_fails() {
        let good = coords(&[(1.0, 1.0)]);
        let cases: Vec<(Vec<Vec<f64>>, Vec<i64>)> = vec![
            (vec![], vec![]),
            (good.clone(), vec![]),
            (vec![], vec![1]),
            (coords(&[(1.0, 1.0), (2.0, 2.0)]), vec![1]),
            (vec![vec![1.0]], vec![1]),
            (vec![vec![1.0, 2.0, 3.0]], vec![1]),
            (coords(&[(-1.0, 1.0)]), vec![1]),
            (coords(&[(1.0, f64::NAN)]), vec![1]),
            (good.clone(), vec![2]),
            (good, vec![-1]),
        ];
        for (c, l) in cases {
            let err = PromptValidator::validate_points(&c, &l, 10, 10).unwrap_err();
            assert_eq!(err.error_code(), "InvalidInput", "coords={c:?} labels={l:?}");
        }
    }

    #[test]
    fn test_text_prompt_sanitization() {
        let prompt = PromptValidator::validate_text_prompt("  a <b>\"red\" 'car'  ").unwrap();
        assert_eq!(prompt.as_str(), "a bred car");
    }

    #[test]
    fn test_text_prompt_rejections() {
        for raw in ["", "   ", "\t\n", "<>\"'", " <\"> "] {
            let err = PromptValidator::validate_text_prompt(raw).unwrap_err();
            assert_eq!(err.error_code(), "InvalidInput", "raw={raw:?}");
        }
        let long = "x".repeat(1001);
        assert!(PromptValidator::validate_text_prompt(&long).is_err());
        let padded = format!("  {}  ", "x".repeat(1000));
        assert!(PromptValidator::validate_text_prompt(&padded).is_ok());
    }

    #[test]
    fn test_dilate_kernel() {
        assert_eq!(PromptValidator::validate_dilate_kernel(None).unwrap(), None);
        assert_eq!(PromptValidator::validate_dilate_kernel(Some(0)).unwrap(), None);
        assert_eq!(PromptValidator::validate_dilate_kernel(Some(5)).unwrap(), Some(5));
        assert_eq!(PromptValidator::validate_dilate_kernel(Some(50)).unwrap(), Some(50));
        assert!(PromptValidator::validate_dilate_kernel(Some(51)).is_err());
        assert!(PromptValidator::validate_dilate_kernel(Some(-3)).is_err());
    }

    #[test]
    fn test_inference_steps() {
        assert_eq!(PromptValidator::validate_inference_steps(None).unwrap(), 50);
        assert_eq!(PromptValidator::validate_inference_steps(Some(10)).unwrap(), 10);
        assert_eq!(PromptValidator::validate_inference_steps(Some(150)).unwrap(), 150);
        assert!(PromptValidator::validate_inference_steps(Some(9)).is_err());
        assert!(PromptValidator::validate_inference_steps(Some(151)).is_err());
    }
}
