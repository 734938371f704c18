//! Error types for inpainting operations

use crate::types::ModelKind;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for inpainting operations
pub type Result<T> = std::result::Result<T, InpaintError>;

/// Errors produced by the codec, validator, registry and pipeline
#[derive(Error, Debug)]
pub enum InpaintError {
    /// Malformed or out-of-range request data (coordinates, labels, prompts, base64)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Decoded payload exceeds the configured byte limit
    #[error("File too large: {size} bytes (maximum {limit} bytes)")]
    FileTooLarge { size: usize, limit: usize },

    /// Image format outside JPEG, PNG and WebP
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A pipeline stage needed a model whose handle is not set
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(ModelKind),

    /// A load attempt failed
    #[error("Failed to load {model} model: {cause}")]
    ModelLoad { model: ModelKind, cause: String },

    /// A model call exceeded the configured deadline
    #[error("Processing timed out during {stage} after {after:?}")]
    ProcessingTimeout { stage: &'static str, after: Duration },

    /// A model call returned an error
    #[error("{model} inference failed: {message}")]
    Inference { model: ModelKind, message: String },

    /// Input/output errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encode errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InpaintError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Create a new model load error
    pub fn model_load<S: Into<String>>(model: ModelKind, cause: S) -> Self {
        Self::ModelLoad {
            model,
            cause: cause.into(),
        }
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(model: ModelKind, message: S) -> Self {
        Self::Inference {
            model,
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a range error for a request or configuration parameter
    pub fn value_out_of_range<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidInput(format!(
            "{parameter} must be within {valid_range}, got {value}"
        ))
    }

    /// Stable code reported in error envelopes
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) | Self::FileTooLarge { .. } | Self::UnsupportedFormat(_) => {
                "InvalidInput"
            },
            Self::ModelNotLoaded(_) => "ModelNotLoaded",
            Self::ModelLoad { .. } => "ModelLoadError",
            Self::ProcessingTimeout { .. } => "ProcessingTimeout",
            Self::Inference { .. } | Self::Io(_) | Self::Image(_) | Self::Internal(_) => {
                "InternalError"
            },
        }
    }

    /// Whether the failure is attributable to the caller or to a known service condition
    ///
    /// Everything else is reported with a generic message and logged in full.
    #[must_use]
    pub fn is_domain_error(&self) -> bool {
        !matches!(
            self,
            Self::Inference { .. } | Self::Io(_) | Self::Image(_) | Self::Internal(_)
        )
    }
}
