//! Inpaint server entry point
//!
//! Parses arguments (with environment fallbacks), installs the tracing
//! subscriber, binds the listener and serves until a shutdown signal.

use super::config::CliConfigBuilder;
use crate::{
    config::{Device, Environment},
    context::AppContext,
    server,
    tracing_config::{init_server_tracing, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Point-prompted object removal, fill and background replacement over HTTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "inpaint-server")]
pub struct Cli {
    /// Deployment environment; production exits when a model fails to load
    #[arg(long, env = "ENVIRONMENT", default_value_t = Environment::Development)]
    pub environment: Environment,

    /// Address to bind
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind
    #[arg(short, long, env = "API_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Prefix for the API routes; empty serves them at the root
    #[arg(long, env = "API_PREFIX", default_value = "/api/v1")]
    pub api_prefix: String,

    /// Comma-separated CORS origins, `*` for any
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub allowed_origins: Vec<String>,

    /// Device to run models on (auto, cpu, cuda)
    #[arg(short, long, env = "DEVICE", default_value_t = Device::Auto)]
    pub device: Device,

    /// Segmenter variant name
    #[arg(long, env = "SAM_MODEL_TYPE", default_value = "vit_h")]
    pub sam_model_type: String,

    /// Directory holding the segmenter encoder and decoder
    #[arg(long, env = "SAM_CHECKPOINT_PATH", default_value = "./pretrained_models/sam_vit_h")]
    pub sam_checkpoint_path: PathBuf,

    /// Inpainter configuration file
    #[arg(
        long,
        env = "LAMA_CONFIG_PATH",
        default_value = "./lama/configs/prediction/default.yaml"
    )]
    pub lama_config_path: PathBuf,

    /// Inpainter model file or directory
    #[arg(long, env = "LAMA_CHECKPOINT_PATH", default_value = "./pretrained_models/big-lama")]
    pub lama_checkpoint_path: PathBuf,

    /// Diffusion model identifier
    #[arg(
        long,
        env = "SD_MODEL_NAME",
        default_value = "stabilityai/stable-diffusion-2-inpainting"
    )]
    pub sd_model_name: String,

    /// Largest image side in pixels; larger inputs are downsampled
    #[arg(long, env = "MAX_IMAGE_SIZE", default_value_t = 2048)]
    pub max_image_size: u32,

    /// Largest accepted image payload in bytes
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = 10_485_760)]
    pub max_file_size: usize,

    /// Serve deterministic mock models instead of loading checkpoints
    #[arg(long = "mock", env = "USE_MOCK_SERVICE")]
    pub use_mock_service: bool,

    /// Terminal model calls allowed to run at once
    #[arg(long, env = "MAX_CONCURRENT_INFERENCE", default_value_t = 1)]
    pub max_concurrent_inference: usize,

    /// Deadline for each model stage, in seconds
    #[arg(long, env = "PROCESSING_TIMEOUT_SECS")]
    pub processing_timeout_secs: Option<u64>,

    /// Intra-op threads per model session (0 = runtime default)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Console => Self::Console,
            CliLogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Self::Json,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_server_tracing(cli.verbose, cli.log_format.into())
        .context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let production = config.environment.is_production();
    let address = config.bind_address();

    info!(
        environment = %config.environment,
        device = %config.device,
        mock_models = config.use_mock_models,
        "Starting inpaint server"
    );

    let ctx = AppContext::from_config(config).context("Failed to create application context")?;
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!(address = %listener.local_addr()?, "Listening");

    let loading_ctx = Arc::clone(&ctx);
    let loader = tokio::spawn(async move {
        let result = loading_ctx.load_models().await;
        match &result {
            Ok(()) => info!("All models loaded, service is ready"),
            Err(e) if production => error!(error = %e, "Model loading failed"),
            Err(e) => warn!(error = %e, "Model loading failed, serving partially ready"),
        }
        result
    });

    let server = server::serve(ctx, listener, server::shutdown_signal());
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.context("Server terminated with an error");
        },
        joined = loader, if production => {
            match joined {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    return Err(e).context("Model loading failed in production");
                },
                Err(e) => return Err(e).context("Model loading task failed"),
            }
        },
    }

    server.await.context("Server terminated with an error")
}

/// Display execution provider availability
fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("Execution Provider Diagnostics");
    println!("System: {cpu_count} CPU cores detected");
    println!("  cpu:  available - always supported");
    let cuda = if crate::backends::cuda_available() {
        "available"
    } else {
        "not available"
    };
    println!("  cuda: {cuda} - NVIDIA GPU acceleration");
    println!("Device 'auto' resolves to: {}", Device::Auto.resolve());
}
