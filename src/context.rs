//! Application context shared by every request handler
//!
//! Built once at startup and handed to the router as state. There is no
//! global: everything a handler needs hangs off [`AppContext`].

use crate::{
    config::ServiceConfig,
    error::Result,
    inference::ModelFactory,
    processor::InpaintProcessor,
    registry::ModelRegistry,
    services::ImageCodec,
    telemetry::ServiceMetrics,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Process-wide state: configuration, models, pipeline and metrics
pub struct AppContext {
    config: ServiceConfig,
    registry: Arc<ModelRegistry>,
    processor: InpaintProcessor,
    codec: ImageCodec,
    started_at: Instant,
    metrics: ServiceMetrics,
}

impl AppContext {
    /// Build a context around `factory`; nothing is loaded yet
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: ServiceConfig, factory: Arc<dyn ModelFactory>) -> Result<Arc<Self>> {
        config.validate()?;
        let registry = Arc::new(ModelRegistry::new(factory));
        let processor = InpaintProcessor::from_config(Arc::clone(&registry), &config);
        let codec = ImageCodec::new(config.limits);
        Ok(Arc::new(Self {
            config,
            registry,
            processor,
            codec,
            started_at: Instant::now(),
            metrics: ServiceMetrics::new(),
        }))
    }

    /// Build a context with the factory the configuration asks for
    ///
    /// Mock models when `use_mock_models` is set, ONNX Runtime models otherwise.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Real models requested in a build without the `onnx` feature
    pub fn from_config(config: ServiceConfig) -> Result<Arc<Self>> {
        let factory = Self::factory_for(&config)?;
        Self::new(config, factory)
    }

    fn factory_for(config: &ServiceConfig) -> Result<Arc<dyn ModelFactory>> {
        if config.use_mock_models {
            return Ok(Arc::new(
                crate::backends::MockModelFactory::new().with_paths(config.models.clone()),
            ));
        }
        #[cfg(feature = "onnx")]
        {
            Ok(Arc::new(crate::backends::OnnxModelFactory::new(
                config.models.clone(),
                config.device,
                config.intra_threads,
            )))
        }
        #[cfg(not(feature = "onnx"))]
        {
            Err(crate::error::InpaintError::internal(
                "built without the onnx feature; enable it or use mock models",
            ))
        }
    }

    /// Load every model; see [`ModelRegistry::load_all`]
    ///
    /// # Errors
    /// - The first model load failure
    pub async fn load_models(&self) -> Result<()> {
        self.registry.load_all().await
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn processor(&self) -> &InpaintProcessor {
        &self.processor
    }

    #[must_use]
    pub fn codec(&self) -> &ImageCodec {
        &self.codec
    }

    #[must_use]
    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Prometheus exposition of the current state
    #[must_use]
    pub fn render_metrics(&self) -> String {
        self.metrics.render(&self.registry, self.uptime())
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockModelFactory;

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ServiceConfig::default();
        config.max_concurrent_inference = 0;
        let err = AppContext::new(config, Arc::new(MockModelFactory::new())).err().unwrap();
        assert_eq!(err.error_code(), "InvalidInput");
    }

    #[tokio::test]
    async fn test_mock_context_loads() {
        let config = ServiceConfig::builder()
            .use_mock_models(true)
            .build()
            .unwrap();
        let context = AppContext::from_config(config).unwrap();
        assert!(!context.registry().is_ready());
        context.load_models().await.unwrap();
        assert!(context.registry().is_ready());
        assert_eq!(
            context.registry().describe(crate::types::ModelKind::Segmenter).backend,
            "mock"
        );
    }
}
