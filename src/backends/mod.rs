//! Model runtime implementations
//!
//! - Mock models (always available, deterministic, used in tests and mock mode)
//! - ONNX Runtime models (feature `onnx`): segmentation and inpainting exports

pub mod mock;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use self::mock::MockModelFactory;

#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxInpainter, OnnxModelFactory, OnnxSegmenter};

use crate::{config::ModelPaths, inference::ModelDescriptor, types::ModelKind};

/// Whether a CUDA execution provider can be used on this machine
#[cfg(feature = "onnx")]
#[must_use]
pub fn cuda_available() -> bool {
    onnx::cuda_available()
}

/// Whether a CUDA execution provider can be used on this machine
#[cfg(not(feature = "onnx"))]
#[must_use]
pub fn cuda_available() -> bool {
    false
}

/// Identifiers for `kind` taken from the configured model paths
pub(crate) fn describe_paths(
    models: &ModelPaths,
    kind: ModelKind,
    backend: &str,
) -> ModelDescriptor {
    let backend = backend.to_string();
    match kind {
        ModelKind::Segmenter => ModelDescriptor {
            backend,
            model_type: Some(models.segmenter_model_type.clone()),
            checkpoint_path: Some(models.segmenter_checkpoint.display().to_string()),
            ..ModelDescriptor::default()
        },
        ModelKind::Inpainter => ModelDescriptor {
            backend,
            config_path: Some(models.inpainter_config.display().to_string()),
            checkpoint_path: Some(models.inpainter_checkpoint.display().to_string()),
            ..ModelDescriptor::default()
        },
        ModelKind::DiffusionFiller => ModelDescriptor {
            backend,
            model_name: Some(models.diffusion_model.clone()),
            ..ModelDescriptor::default()
        },
    }
}
