//! Conversion of CLI arguments into a [`ServiceConfig`]

use crate::cli::main_impl::Cli;
use crate::config::{ModelPaths, ServiceConfig};
use anyhow::{Context, Result};
use std::time::Duration;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the service configuration from parsed arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServiceConfig> {
        let models = ModelPaths {
            segmenter_model_type: cli.sam_model_type.clone(),
            segmenter_checkpoint: cli.sam_checkpoint_path.clone(),
            inpainter_config: cli.lama_config_path.clone(),
            inpainter_checkpoint: cli.lama_checkpoint_path.clone(),
            diffusion_model: cli.sd_model_name.clone(),
        };

        let allowed_origins = cli
            .allowed_origins
            .iter()
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        ServiceConfig::builder()
            .environment(cli.environment)
            .host(cli.host.clone())
            .port(cli.port)
            .api_prefix(cli.api_prefix.clone())
            .allowed_origins(allowed_origins)
            .device(cli.device)
            .models(models)
            .max_image_dimension(cli.max_image_size)
            .max_file_size(cli.max_file_size)
            .use_mock_models(cli.use_mock_service)
            .max_concurrent_inference(cli.max_concurrent_inference)
            .processing_timeout(cli.processing_timeout_secs.map(Duration::from_secs))
            .intra_threads(cli.threads)
            .build()
            .context("Invalid configuration")
    }

    /// Checks that do not depend on the built configuration
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.host.trim().is_empty() {
            anyhow::bail!("API host cannot be empty");
        }
        if cli.processing_timeout_secs == Some(0) {
            anyhow::bail!("PROCESSING_TIMEOUT_SECS must be at least 1 when set");
        }
        if !cli.use_mock_service && cli.sam_model_type.trim().is_empty() {
            anyhow::bail!("SAM_MODEL_TYPE cannot be empty");
        }
        Ok(())
    }
}
