//! Configuration types for the inpainting service

use crate::error::{InpaintError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Device the models run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// CUDA when an execution provider for it is available, CPU otherwise
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
}

impl Device {
    /// Resolve `Auto` against the execution providers present in this build
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => {
                if crate::backends::cuda_available() {
                    Self::Cuda
                } else {
                    Self::Cpu
                }
            },
            other => other,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

impl FromStr for Device {
    type Err = InpaintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(InpaintError::invalid_input(format!(
                "Unknown device: {other}. Supported: auto, cpu, cuda"
            ))),
        }
    }
}

/// Deployment environment; production refuses to start with failed model loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = InpaintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(InpaintError::invalid_input(format!(
                "Unknown environment: {other}. Supported: development, production"
            ))),
        }
    }
}

/// Model identifiers and checkpoint locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPaths {
    /// Segmenter variant name, e.g. `vit_h`
    pub segmenter_model_type: String,
    /// Directory holding the segmenter's `encoder.onnx` and `decoder.onnx`
    pub segmenter_checkpoint: PathBuf,
    /// Inpainter configuration file (reported, not parsed)
    pub inpainter_config: PathBuf,
    /// Inpainter ONNX file, or a directory containing `lama_fp32.onnx`
    pub inpainter_checkpoint: PathBuf,
    /// Diffusion model identifier
    pub diffusion_model: String,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            segmenter_model_type: "vit_h".to_string(),
            segmenter_checkpoint: PathBuf::from("./pretrained_models/sam_vit_h"),
            inpainter_config: PathBuf::from("./lama/configs/prediction/default.yaml"),
            inpainter_checkpoint: PathBuf::from("./pretrained_models/big-lama"),
            diffusion_model: "stabilityai/stable-diffusion-2-inpainting".to_string(),
        }
    }
}

/// Limits applied by the image codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLimits {
    /// Largest allowed side in pixels; bigger images are downsampled
    pub max_dimension: u32,
    /// Largest allowed decoded payload in bytes
    pub max_file_size: usize,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_dimension: 2048,
            max_file_size: 10_485_760,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    /// Prefix the API routes are mounted under, e.g. `/api/v1`
    pub api_prefix: String,
    /// CORS origins; `*` allows any
    pub allowed_origins: Vec<String>,
    pub device: Device,
    pub models: ModelPaths,
    pub limits: ImageLimits,
    /// Load deterministic mock models instead of real ones
    pub use_mock_models: bool,
    /// Concurrent inpainting/diffusion calls allowed across requests
    pub max_concurrent_inference: usize,
    /// Deadline for each model call; `None` disables it
    pub processing_timeout: Option<Duration>,
    /// Number of intra-op threads for ONNX sessions (0 = auto)
    pub intra_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_prefix: "/api/v1".to_string(),
            allowed_origins: vec!["*".to_string()],
            device: Device::default(),
            models: ModelPaths::default(),
            limits: ImageLimits::default(),
            use_mock_models: false,
            max_concurrent_inference: 1,
            processing_timeout: None,
            intra_threads: 0,
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inpaint_server::config::{Device, ServiceConfig};
    ///
    /// let config = ServiceConfig::builder()
    ///     .device(Device::Cpu)
    ///     .use_mock_models(true)
    ///     .port(9000)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.port, 9000);
    /// ```
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Image dimension or file size limit of zero
    /// - Zero concurrent inference permits
    /// - Zero processing timeout
    /// - API prefix that is non-empty but does not start with `/`
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_dimension == 0 {
            return Err(InpaintError::value_out_of_range(
                "max image dimension",
                self.limits.max_dimension,
                "1 or more pixels",
            ));
        }
        if self.limits.max_file_size == 0 {
            return Err(InpaintError::value_out_of_range(
                "max file size",
                self.limits.max_file_size,
                "1 or more bytes",
            ));
        }
        if self.max_concurrent_inference == 0 {
            return Err(InpaintError::value_out_of_range(
                "max concurrent inference",
                self.max_concurrent_inference,
                "1 or more",
            ));
        }
        if self.processing_timeout.is_some_and(|t| t.is_zero()) {
            return Err(InpaintError::invalid_input(
                "processing timeout must be positive when set",
            ));
        }
        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            return Err(InpaintError::invalid_input(format!(
                "API prefix must start with '/', got '{}'",
                self.api_prefix
            )));
        }
        Ok(())
    }

    /// `host:port` string for binding
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the API prefix; a trailing `/` is dropped
    #[must_use]
    pub fn api_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        let prefix = prefix.into();
        self.config.api_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.config.allowed_origins = origins;
        self
    }

    #[must_use]
    pub fn device(mut self, device: Device) -> Self {
        self.config.device = device;
        self
    }

    #[must_use]
    pub fn models(mut self, models: ModelPaths) -> Self {
        self.config.models = models;
        self
    }

    #[must_use]
    pub fn max_image_dimension(mut self, pixels: u32) -> Self {
        self.config.limits.max_dimension = pixels;
        self
    }

    #[must_use]
    pub fn max_file_size(mut self, bytes: usize) -> Self {
        self.config.limits.max_file_size = bytes;
        self
    }

    #[must_use]
    pub fn use_mock_models(mut self, enabled: bool) -> Self {
        self.config.use_mock_models = enabled;
        self
    }

    #[must_use]
    pub fn max_concurrent_inference(mut self, permits: usize) -> Self {
        self.config.max_concurrent_inference = permits;
        self
    }

    #[must_use]
    pub fn processing_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.processing_timeout = timeout;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`ServiceConfig::validate`]
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
