//! ONNX Runtime backends
//!
//! - [`OnnxSegmenter`]: SAM-style encoder/decoder export. `set_image` runs
//!   the encoder once and caches the embeddings; `predict` runs only the
//!   decoder, with multimask output.
//! - [`OnnxInpainter`]: LaMa export with a fixed 512 x 512 input.
//!
//! The diffusion model has no ONNX runtime here; [`OnnxModelFactory`] reports
//! a load error for it unless a loader is injected.

use super::describe_paths;
use crate::{
    config::{Device, ModelPaths},
    error::{InpaintError, Result},
    inference::{DiffusionFiller, Inpainter, ModelDescriptor, ModelFactory, Segmenter},
    types::{Mask, MaskCandidates, ModelKind, PixelBuffer, PointPrompts},
};
use image::{imageops::FilterType, Rgb, RgbImage};
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Axis, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use ort::value::Value;
use std::{
    fmt::Display,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

/// Side length the segmentation encoder expects
const ENCODER_SIZE: u32 = 1024;
/// Side length the inpainting model expects
const LAMA_SIZE: u32 = 512;
/// File name looked up when the inpainter checkpoint is a directory
const LAMA_FILE: &str = "lama_fp32.onnx";

/// Whether a CUDA execution provider can be used on this machine
#[must_use]
pub fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn runtime_error<E: Display>(
    kind: ModelKind,
    context: &'static str,
) -> impl FnOnce(E) -> InpaintError {
    move |e| InpaintError::inference(kind, format!("{context}: {e}"))
}

fn load_error<E: Display>(
    kind: ModelKind,
    context: &'static str,
) -> impl FnOnce(E) -> InpaintError {
    move |e| InpaintError::model_load(kind, format!("{context}: {e}"))
}

/// Create a session builder configured for `device`
fn session_builder(
    kind: ModelKind,
    device: Device,
    intra_threads: usize,
) -> Result<SessionBuilder> {
    let builder = Session::builder()
        .map_err(load_error(kind, "Failed to create session builder"))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(load_error(kind, "Failed to set optimization level"))?;

    let builder = match device {
        Device::Cpu => {
            log::info!("Using CPU execution provider for {kind}");
            builder
        },
        Device::Cuda => {
            let cuda_provider = CUDAExecutionProvider::default();
            if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                log::info!("Using CUDA execution provider for {kind}");
                builder
                    .with_execution_providers([cuda_provider.build()])
                    .map_err(load_error(kind, "Failed to set CUDA execution provider"))?
            } else {
                log::warn!(
                    "CUDA execution provider requested but not available, falling back to CPU"
                );
                builder
            }
        },
        Device::Auto => {
            let mut providers = Vec::new();
            let cuda_provider = CUDAExecutionProvider::default();
            if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                providers.push(cuda_provider.build());
            }
            let coreml_provider = CoreMLExecutionProvider::default();
            if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                providers.push(coreml_provider.with_subgraphs(true).build());
            }
            if providers.is_empty() {
                log::warn!("No hardware acceleration available for {kind}, using CPU");
                builder
            } else {
                builder
                    .with_execution_providers(providers)
                    .map_err(load_error(kind, "Failed to set auto execution providers"))?
            }
        },
    };

    let intra_threads = if intra_threads > 0 {
        intra_threads
    } else {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4)
    };

    builder
        .with_intra_threads(intra_threads)
        .map_err(load_error(kind, "Failed to set intra threads"))
}

fn commit(kind: ModelKind, device: Device, intra_threads: usize, path: &Path) -> Result<Session> {
    if !path.is_file() {
        return Err(InpaintError::model_load(
            kind,
            format!("checkpoint not found: {}", path.display()),
        ));
    }
    let started = Instant::now();
    let session = session_builder(kind, device, intra_threads)?
        .commit_from_file(path)
        .map_err(load_error(kind, "Failed to create session from model file"))?;
    log::debug!(
        "Loaded {kind} session from {} in {:.0}ms",
        path.display(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(session)
}

/// NCHW float tensor in `[0, 1]` from an RGB image
fn to_nchw(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for (c, value) in pixel.0.iter().enumerate() {
            tensor[[0, c, y as usize, x as usize]] = f32::from(*value) / 255.0;
        }
    }
    tensor
}

/// Encoder outputs cached between `set_image` and `predict`
struct Embeddings {
    image_embeddings: ArrayD<f32>,
    high_res_features_0: ArrayD<f32>,
    high_res_features_1: ArrayD<f32>,
    width: u32,
    height: u32,
}

/// Segmentation model backed by an encoder and a decoder session
pub struct OnnxSegmenter {
    encoder: Session,
    decoder: Session,
    embeddings: Option<Embeddings>,
}

impl OnnxSegmenter {
    /// Load `encoder.onnx` and `decoder.onnx` from `checkpoint_dir`
    ///
    /// # Errors
    /// - Either file is missing
    /// - Session creation failures
    pub fn load(checkpoint_dir: &Path, device: Device, intra_threads: usize) -> Result<Self> {
        let kind = ModelKind::Segmenter;
        let encoder = commit(kind, device, intra_threads, &checkpoint_dir.join("encoder.onnx"))?;
        let decoder = commit(kind, device, intra_threads, &checkpoint_dir.join("decoder.onnx"))?;
        Ok(Self {
            encoder,
            decoder,
            embeddings: None,
        })
    }
}

impl Segmenter for OnnxSegmenter {
    fn set_image(&mut self, image: &PixelBuffer) -> Result<()> {
        let kind = ModelKind::Segmenter;
        let started = Instant::now();
        let resized = image::imageops::resize(
            image.as_rgb(),
            ENCODER_SIZE,
            ENCODER_SIZE,
            FilterType::Triangle,
        );
        let input = Value::from_array(to_nchw(&resized))
            .map_err(runtime_error(kind, "Failed to convert input tensor"))?;

        let outputs = self
            .encoder
            .run(ort::inputs!["input" => input])
            .map_err(runtime_error(kind, "Encoder inference failed"))?;
        let extract = |name: &str| -> Result<ArrayD<f32>> {
            Ok(outputs[name]
                .try_extract_array::<f32>()
                .map_err(runtime_error(kind, "Failed to extract encoder output"))?
                .to_owned())
        };
        let embeddings = Embeddings {
            image_embeddings: extract("image_embeddings")?,
            high_res_features_0: extract("high_res_features_0")?,
            high_res_features_1: extract("high_res_features_1")?,
            width: image.width(),
            height: image.height(),
        };
        drop(outputs);

        self.embeddings = Some(embeddings);
        log::debug!(
            "Encoded {}x{} image in {:.0}ms",
            image.width(),
            image.height(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    fn predict(&mut self, prompts: &PointPrompts) -> Result<MaskCandidates> {
        let kind = ModelKind::Segmenter;
        let embeddings = self
            .embeddings
            .as_ref()
            .ok_or_else(|| InpaintError::inference(kind, "predict called before set_image"))?;
        let (width, height) = (embeddings.width, embeddings.height);

        // Prompts are given in image pixels; the decoder expects encoder space
        let sx = ENCODER_SIZE as f32 / width as f32;
        let sy = ENCODER_SIZE as f32 / height as f32;
        let n = prompts.len();
        let coords: Vec<f32> = prompts
            .coords()
            .iter()
            .flat_map(|[x, y]| [x * sx, y * sy])
            .collect();
        let labels: Vec<f32> = prompts.labels().into_iter().map(f32::from).collect();

        let point_coords = Array3::from_shape_vec((1, n, 2), coords)
            .map_err(runtime_error(kind, "Invalid point coordinate shape"))?;
        let point_labels = Array2::from_shape_vec((1, n), labels)
            .map_err(runtime_error(kind, "Invalid point label shape"))?;
        let orig_size = Array1::<i64>::from_vec(vec![i64::from(height), i64::from(width)]);

        let value = |array: ArrayD<f32>| {
            Value::from_array(array).map_err(runtime_error(kind, "Failed to convert decoder input"))
        };
        let inputs = ort::inputs![
            "image_embeddings" => value(embeddings.image_embeddings.clone())?,
            "high_res_features_0" => value(embeddings.high_res_features_0.clone())?,
            "high_res_features_1" => value(embeddings.high_res_features_1.clone())?,
            "point_coords" => value(point_coords.into_dyn())?,
            "point_labels" => value(point_labels.into_dyn())?,
            "mask_input" => value(Array4::<f32>::zeros((1, 1, 256, 256)).into_dyn())?,
            "has_mask_input" => value(Array1::<f32>::zeros(1).into_dyn())?,
            "orig_im_size" => Value::from_array(orig_size)
                .map_err(runtime_error(kind, "Failed to convert decoder input"))?,
        ];

        let outputs = self
            .decoder
            .run(inputs)
            .map_err(runtime_error(kind, "Decoder inference failed"))?;
        let masks = outputs["masks"]
            .try_extract_array::<f32>()
            .map_err(runtime_error(kind, "Failed to extract masks"))?
            .into_dimensionality::<Ix4>()
            .map_err(runtime_error(kind, "Unexpected mask shape"))?;
        let scores: Vec<f32> = outputs["iou_predictions"]
            .try_extract_array::<f32>()
            .map_err(runtime_error(kind, "Failed to extract scores"))?
            .iter()
            .copied()
            .collect();

        let (_, count, mask_h, mask_w) = masks.dim();
        let batch = masks.index_axis(Axis(0), 0);
        let mut candidates = Vec::with_capacity(count);
        for index in 0..count {
            let logits = batch.index_axis(Axis(0), index);
            // Nearest sample when the export returns a different resolution
            candidates.push(Mask::from_fn(width, height, |x, y| {
                let my = (y as usize * mask_h) / height as usize;
                let mx = (x as usize * mask_w) / width as usize;
                logits[[my, mx]] > 0.0
            }));
        }

        MaskCandidates::new(candidates, scores)
    }
}

/// Inpainting model behind a single session
pub struct OnnxInpainter {
    session: Mutex<Session>,
}

impl OnnxInpainter {
    /// Load the model from a file, or from `lama_fp32.onnx` inside a directory
    ///
    /// # Errors
    /// - Missing checkpoint
    /// - Session creation failures
    pub fn load(checkpoint: &Path, device: Device, intra_threads: usize) -> Result<Self> {
        let path: PathBuf = if checkpoint.is_dir() {
            checkpoint.join(LAMA_FILE)
        } else {
            checkpoint.to_path_buf()
        };
        let session = commit(ModelKind::Inpainter, device, intra_threads, &path)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl Inpainter for OnnxInpainter {
    fn inpaint(&self, image: &PixelBuffer, mask: &Mask) -> Result<PixelBuffer> {
        let kind = ModelKind::Inpainter;
        let (width, height) = image.dimensions();
        let resized =
            image::imageops::resize(image.as_rgb(), LAMA_SIZE, LAMA_SIZE, FilterType::CatmullRom);
        let mask_resized = image::imageops::resize(
            &mask.to_luma(),
            LAMA_SIZE,
            LAMA_SIZE,
            FilterType::Nearest,
        );

        let image_tensor = to_nchw(&resized);
        let mut mask_tensor = Array4::<f32>::zeros((1, 1, LAMA_SIZE as usize, LAMA_SIZE as usize));
        for (x, y, pixel) in mask_resized.enumerate_pixels() {
            if pixel.0[0] > 0 {
                mask_tensor[[0, 0, y as usize, x as usize]] = 1.0;
            }
        }

        let inputs = ort::inputs![
            "image" => Value::from_array(image_tensor)
                .map_err(runtime_error(kind, "Failed to convert image tensor"))?,
            "mask" => Value::from_array(mask_tensor)
                .map_err(runtime_error(kind, "Failed to convert mask tensor"))?,
        ];

        let mut session = self
            .session
            .lock()
            .map_err(|_| InpaintError::internal("inpainter session lock poisoned"))?;
        let outputs = session
            .run(inputs)
            .map_err(runtime_error(kind, "Inpainting inference failed"))?;
        let output = outputs["output"]
            .try_extract_array::<f32>()
            .map_err(runtime_error(kind, "Failed to extract output"))?;

        let mut painted = RgbImage::new(LAMA_SIZE, LAMA_SIZE);
        for (x, y, pixel) in painted.enumerate_pixels_mut() {
            let (x, y) = (x as usize, y as usize);
            let channel = |c: usize| output[[0, c, y, x]].clamp(0.0, 255.0).round() as u8;
            *pixel = Rgb([channel(0), channel(1), channel(2)]);
        }
        drop(outputs);
        drop(session);

        let painted = image::imageops::resize(&painted, width, height, FilterType::CatmullRom);
        // Pixels outside the mask keep their original values
        let mut result = image.as_rgb().clone();
        for (x, y, pixel) in result.enumerate_pixels_mut() {
            if mask.get(x, y) {
                *pixel = *painted.get_pixel(x, y);
            }
        }
        PixelBuffer::from_rgb(result)
    }
}

/// Loader for a diffusion runtime supplied by the embedding application
pub type DiffusionLoader =
    Arc<dyn Fn(&ModelPaths, Device) -> Result<Box<dyn DiffusionFiller>> + Send + Sync>;

/// Factory for ONNX Runtime models
#[derive(Clone)]
pub struct OnnxModelFactory {
    models: ModelPaths,
    device: Device,
    intra_threads: usize,
    diffusion_loader: Option<DiffusionLoader>,
}

impl OnnxModelFactory {
    /// Create a factory; `Device::Auto` is resolved here
    #[must_use]
    pub fn new(models: ModelPaths, device: Device, intra_threads: usize) -> Self {
        Self {
            models,
            device: device.resolve(),
            intra_threads,
            diffusion_loader: None,
        }
    }

    /// Use `loader` to construct the diffusion model
    #[must_use]
    pub fn with_diffusion_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&ModelPaths, Device) -> Result<Box<dyn DiffusionFiller>> + Send + Sync + 'static,
    {
        self.diffusion_loader = Some(Arc::new(loader));
        self
    }
}

impl ModelFactory for OnnxModelFactory {
    fn load_segmenter(&self) -> Result<Box<dyn Segmenter>> {
        let segmenter = OnnxSegmenter::load(
            &self.models.segmenter_checkpoint,
            self.device,
            self.intra_threads,
        )?;
        Ok(Box::new(segmenter))
    }

    fn load_inpainter(&self) -> Result<Box<dyn Inpainter>> {
        let inpainter = OnnxInpainter::load(
            &self.models.inpainter_checkpoint,
            self.device,
            self.intra_threads,
        )?;
        Ok(Box::new(inpainter))
    }

    fn load_diffusion_filler(&self) -> Result<Box<dyn DiffusionFiller>> {
        match &self.diffusion_loader {
            Some(loader) => loader(&self.models, self.device),
            None => Err(InpaintError::model_load(
                ModelKind::DiffusionFiller,
                format!(
                    "no diffusion runtime is available for {}",
                    self.models.diffusion_model
                ),
            )),
        }
    }

    fn describe(&self, kind: ModelKind) -> ModelDescriptor {
        describe_paths(&self.models, kind, "onnx")
    }

    fn device(&self) -> Device {
        self.device
    }
}
