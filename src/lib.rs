#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::unused_async)]

//! # Inpaint Server
//!
//! Point-prompted image editing over HTTP. A client uploads an image and one
//! or more points on an object; the service segments the object and then
//! either removes it, paints a text prompt into its region, or keeps it and
//! regenerates the background.
//!
//! ## Features
//!
//! - **Three operations**: remove (inpainting), fill and replace (diffusion)
//! - **Lazy model registry**: each model is loaded at most once, concurrently
//!   with the others, and readiness only ever moves forward
//! - **Safe sharing**: the stateful segmenter is bound and queried under one
//!   lock so concurrent requests never see each other's image
//! - **ONNX Runtime backends** with CUDA and `CoreML` execution providers
//! - **Mock models** for development and tests, selected by configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use inpaint_server::{config::ServiceConfig, context::AppContext, server};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::builder().use_mock_models(true).build()?;
//! let ctx = AppContext::from_config(config)?;
//! ctx.load_models().await?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! server::serve(ctx, listener, server::shutdown_signal()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Library Usage
//!
//! The pipeline does not depend on the HTTP layer:
//!
//! ```rust,no_run
//! use inpaint_server::{config::ServiceConfig, context::AppContext, types::PixelBuffer};
//!
//! # async fn example(image: PixelBuffer) -> anyhow::Result<()> {
//! let ctx = AppContext::from_config(ServiceConfig::builder().use_mock_models(true).build()?)?;
//! ctx.load_models().await?;
//! let outcome = ctx
//!     .processor()
//!     .remove(image, vec![vec![100.0, 75.0]], vec![1], Some(5))
//!     .await?;
//! println!("selected mask {} ({:.2})", outcome.selected_index, outcome.selected_score);
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backends
//! - `cli` (default): server binary and tracing subscriber setup
//! - `tracing-json`: JSON log output
//! - `gpu-stats`: NVML-backed device memory statistics

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod inference;
pub mod processor;
pub mod registry;
pub mod server;
pub mod services;
pub mod telemetry;
pub mod tracing_config;
pub mod types;
pub mod utils;

pub use config::{Device, Environment, ImageLimits, ModelPaths, ServiceConfig};
pub use context::AppContext;
pub use error::{InpaintError, Result};
pub use inference::{DiffusionFiller, Inpainter, ModelDescriptor, ModelFactory, Segmenter};
pub use processor::{InpaintProcessor, Operation, PipelineRequest};
pub use registry::{LoadedFlags, MemoryUsage, ModelRegistry};
pub use services::{ImageCodec, ImageSource, MaskDilator};
pub use telemetry::ServiceMetrics;
pub use types::{
    Mask, MaskCandidates, ModelKind, OperationResult, PixelBuffer, PointPrompts, PromptPoint,
    ProcessingTimings, TextPrompt,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_server_tracing, TracingConfig, TracingFormat};
