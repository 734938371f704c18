//! Model capability traits and the factory seam used by the registry
//!
//! Every method here is blocking and may run for seconds. Callers in async
//! code must move the call onto the blocking pool; the registry and the
//! pipeline orchestrator do that for you.

use crate::{
    config::Device,
    error::Result,
    types::{Mask, MaskCandidates, ModelKind, PixelBuffer, PointPrompts, TextPrompt},
};
use serde::Serialize;

/// Point-prompted segmentation model
///
/// The model keeps per-image state: [`Segmenter::set_image`] binds an image
/// and [`Segmenter::predict`] answers prompts against whatever image is bound.
/// The two calls must be issued as one unit per request; see
/// [`crate::registry::SharedSegmenter`].
pub trait Segmenter: Send {
    /// Bind `image` as the target of subsequent predictions
    ///
    /// # Errors
    /// - Model execution failures
    fn set_image(&mut self, image: &PixelBuffer) -> Result<()>;

    /// Produce candidate masks for the bound image
    ///
    /// Every returned mask has the bound image's dimensions.
    ///
    /// # Errors
    /// - No image bound
    /// - Model execution failures
    fn predict(&mut self, prompts: &PointPrompts) -> Result<MaskCandidates>;
}

/// Mask-guided image completion used for removal
pub trait Inpainter: Send + Sync {
    /// Fill the `true` region of `mask` from its surroundings
    ///
    /// # Errors
    /// - Model execution failures
    fn inpaint(&self, image: &PixelBuffer, mask: &Mask) -> Result<PixelBuffer>;
}

/// Text-and-mask-guided diffusion model
pub trait DiffusionFiller: Send + Sync {
    /// Paint `prompt` into the `true` region of `mask`
    ///
    /// # Errors
    /// - Model execution failures
    fn fill(&self, image: &PixelBuffer, mask: &Mask, prompt: &TextPrompt) -> Result<PixelBuffer>;

    /// Keep the `true` region of `mask` and regenerate everything else from `prompt`
    ///
    /// # Errors
    /// - Model execution failures
    fn replace_background(
        &self,
        image: &PixelBuffer,
        mask: &Mask,
        prompt: &TextPrompt,
        steps: u32,
    ) -> Result<PixelBuffer>;
}

/// Identifiers reported for a model slot by `/models` and `/info`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    /// Runtime that will execute the model, e.g. `onnx` or `mock`
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

/// Constructs concrete models for the registry
///
/// Implementations are injected when the application context is built, so
/// the registry never names a concrete runtime.
pub trait ModelFactory: Send + Sync {
    /// Load the segmentation model
    ///
    /// # Errors
    /// - Missing or unreadable checkpoint
    /// - Runtime session creation failures
    fn load_segmenter(&self) -> Result<Box<dyn Segmenter>>;

    /// Load the inpainting model
    ///
    /// # Errors
    /// - Missing or unreadable checkpoint
    /// - Runtime session creation failures
    fn load_inpainter(&self) -> Result<Box<dyn Inpainter>>;

    /// Load the diffusion model
    ///
    /// # Errors
    /// - Missing or unreadable checkpoint
    /// - No diffusion runtime available to this factory
    fn load_diffusion_filler(&self) -> Result<Box<dyn DiffusionFiller>>;

    /// Identifiers for `kind`, available before and after loading
    fn describe(&self, kind: ModelKind) -> ModelDescriptor;

    /// Device the models run on, already resolved (never `Auto`)
    fn device(&self) -> Device;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockModelFactory;

    #[test]
    fn test_factory_is_object_safe() {
        let factory: Box<dyn ModelFactory> = Box::new(MockModelFactory::new());
        assert_eq!(factory.describe(ModelKind::Segmenter).backend, "mock");
        assert_ne!(factory.device(), Device::Auto);
    }

    #[test]
    fn test_descriptor_skips_missing_fields() {
        let descriptor = ModelDescriptor {
            backend: "onnx".to_string(),
            model_name: Some("sd".to_string()),
            ..ModelDescriptor::default()
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["backend"], "onnx");
        assert_eq!(json["model_name"], "sd");
        assert!(json.get("checkpoint_path").is_none());
    }
}
