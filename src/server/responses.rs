//! Response envelopes
//!
//! Every body carries `success`, `message` and a UTC `timestamp`.

use crate::{
    inference::ModelDescriptor,
    registry::{LoadedFlags, MemoryUsage},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error_code: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(message: String, error_code: &'static str) -> Self {
        Self {
            success: false,
            message,
            error_code,
            timestamp: Utc::now(),
        }
    }
}

/// Result of a remove, fill or replace call
#[derive(Debug, Serialize)]
pub struct InpaintResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// PNG data URI
    pub result_image: String,
    /// PNG data URI, 0 or 255 per pixel
    pub mask_image: String,
    /// Seconds spent on the whole request
    pub processing_time: f64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// `healthy`, `partial` or `ready`
    pub status: &'static str,
    pub models_loaded: LoadedFlags,
    pub device: String,
    pub memory_usage: MemoryUsage,
    /// Seconds since the context was created
    pub uptime: f64,
}

#[derive(Debug, Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    /// Set once the model is loaded
    pub device: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelStatusResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub models: BTreeMap<&'static str, ModelStatus>,
}
