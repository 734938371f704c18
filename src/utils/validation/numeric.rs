//! Numeric validation utilities
//!
//! Range and finiteness checks shared by request and configuration validation.

use crate::error::{InpaintError, Result};
use std::fmt::Display;

/// Validator for numeric request parameters
pub struct NumericValidator;

impl NumericValidator {
    /// Check that `value` lies within `[min, max]`
    ///
    /// # Errors
    /// - `InvalidInput` naming `name` and the accepted range
    pub fn validate_range<T>(value: T, min: T, max: T, name: &str) -> Result<T>
    where
        T: PartialOrd + Display + Copy,
    {
        if value < min || value > max {
            return Err(InpaintError::value_out_of_range(
                name,
                value,
                &format!("[{min}, {max}]"),
            ));
        }
        Ok(value)
    }

    /// Check that a float is neither NaN nor infinite
    ///
    /// # Errors
    /// - `InvalidInput` when the value is not finite
    pub fn validate_finite(value: f64, name: &str) -> Result<f64> {
        if !value.is_finite() {
            return Err(InpaintError::invalid_input(format!(
                "{name} must be a finite number, got {value}"
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_range_bounds_inclusive() {
        assert_eq!(NumericValidator::validate_range(0, 0, 50, "k").unwrap(), 0);
        assert_eq!(NumericValidator::validate_range(50, 0, 50, "k").unwrap(), 50);
        assert!(NumericValidator::validate_range(51, 0, 50, "k").is_err());
        assert!(NumericValidator::validate_range(-1, 0, 50, "k").is_err());
    }

    #[test]
    fn test_validate_range_message_names_parameter() {
        let err = NumericValidator::validate_range(9u32, 10, 150, "num_inference_steps")
            .unwrap_err();
        assert_eq!(err.error_code(), "InvalidInput");
        assert!(err.to_string().contains("num_inference_steps"));
        assert!(err.to_string().contains("[10, 150]"));
    }

    #[test]
    fn test_validate_finite() {
        assert!(NumericValidator::validate_finite(1.5, "x").is_ok());
        assert!(NumericValidator::validate_finite(f64::NAN, "x").is_err());
        assert!(NumericValidator::validate_finite(f64::INFINITY, "x").is_err());
    }
}
