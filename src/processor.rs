//! Pipeline orchestrator for remove, fill and replace
//!
//! Every operation runs the same linear stage sequence:
//! validate, segment, dilate, then one terminal model call. Model calls run on
//! the blocking pool so the async runtime keeps serving other requests.

use crate::{
    config::ServiceConfig,
    error::{InpaintError, Result},
    registry::{ModelRegistry, SharedSegmenter},
    services::MaskDilator,
    types::{
        Mask, MaskCandidates, ModelKind, OperationResult, PixelBuffer, PointPrompts,
        ProcessingTimings, TextPrompt,
    },
    utils::PromptValidator,
};
use std::{
    fmt,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, instrument, span, Instrument, Level};

/// Terminal stage of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Erase the object with the inpainter
    Remove,
    /// Paint the prompt into the object region
    Fill { prompt: TextPrompt },
    /// Keep the object and regenerate the background
    Replace { prompt: TextPrompt, steps: u32 },
}

impl Operation {
    /// Name used in logs, metrics and messages
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Fill { .. } => "fill",
            Self::Replace { .. } => "replace",
        }
    }

    /// Model the terminal stage calls
    #[must_use]
    pub fn terminal_model(&self) -> ModelKind {
        match self {
            Self::Remove => ModelKind::Inpainter,
            Self::Fill { .. } | Self::Replace { .. } => ModelKind::DiffusionFiller,
        }
    }

    #[must_use]
    pub fn prompt(&self) -> Option<&TextPrompt> {
        match self {
            Self::Remove => None,
            Self::Fill { prompt } | Self::Replace { prompt, .. } => Some(prompt),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One pipeline invocation
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub image: PixelBuffer,
    /// Raw `[x, y]` pairs, validated against the image before any model call
    pub point_coords: Vec<Vec<f64>>,
    /// Raw labels, 1 for foreground and 0 for background
    pub point_labels: Vec<i64>,
    /// Square kernel side; `None` or `0` skips dilation
    pub dilate_kernel_size: Option<u32>,
    pub operation: Operation,
}

enum TerminalModel {
    Inpainter(Arc<dyn crate::inference::Inpainter>),
    Diffusion(Arc<dyn crate::inference::DiffusionFiller>),
}

/// Runs pipelines against the models held by a [`ModelRegistry`]
pub struct InpaintProcessor {
    registry: Arc<ModelRegistry>,
    inference_permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl InpaintProcessor {
    /// Create a processor allowing `max_concurrent_inference` terminal model calls at once
    #[must_use]
    pub fn new(
        registry: Arc<ModelRegistry>,
        max_concurrent_inference: usize,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            inference_permits: Arc::new(Semaphore::new(max_concurrent_inference.max(1))),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(registry: Arc<ModelRegistry>, config: &ServiceConfig) -> Self {
        Self::new(
            registry,
            config.max_concurrent_inference,
            config.processing_timeout,
        )
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Segment the prompted object and inpaint it away
    ///
    /// # Errors
    /// See [`Self::process`]
    pub async fn remove(
        &self,
        image: PixelBuffer,
        point_coords: Vec<Vec<f64>>,
        point_labels: Vec<i64>,
        dilate_kernel_size: Option<u32>,
    ) -> Result<OperationResult> {
        self.process(PipelineRequest {
            image,
            point_coords,
            point_labels,
            dilate_kernel_size,
            operation: Operation::Remove,
        })
        .await
    }

    /// Segment the prompted object and paint `prompt` into its region
    ///
    /// # Errors
    /// See [`Self::process`]
    pub async fn fill(
        &self,
        image: PixelBuffer,
        point_coords: Vec<Vec<f64>>,
        point_labels: Vec<i64>,
        dilate_kernel_size: Option<u32>,
        prompt: TextPrompt,
    ) -> Result<OperationResult> {
        self.process(PipelineRequest {
            image,
            point_coords,
            point_labels,
            dilate_kernel_size,
            operation: Operation::Fill { prompt },
        })
        .await
    }

    /// Segment the prompted object and regenerate everything around it
    ///
    /// # Errors
    /// See [`Self::process`]
    pub async fn replace(
        &self,
        image: PixelBuffer,
        point_coords: Vec<Vec<f64>>,
        point_labels: Vec<i64>,
        dilate_kernel_size: Option<u32>,
        prompt: TextPrompt,
        steps: u32,
    ) -> Result<OperationResult> {
        self.process(PipelineRequest {
            image,
            point_coords,
            point_labels,
            dilate_kernel_size,
            operation: Operation::Replace { prompt, steps },
        })
        .await
    }

    /// Run one pipeline end to end
    ///
    /// The returned mask and result always have the input image's dimensions.
    /// Nothing is returned when a later stage fails.
    ///
    /// # Errors
    /// - `InvalidInput` for prompts or kernel sizes that fail validation
    /// - `ModelNotLoaded` when a model the pipeline needs has no handle
    /// - `ProcessingTimeout` when a model stage exceeds the configured deadline
    /// - `Inference` when a model call fails, panics or returns the wrong shape
    #[instrument(
        skip_all,
        fields(
            operation = %request.operation,
            width = request.image.width(),
            height = request.image.height()
        )
    )]
    pub async fn process(&self, request: PipelineRequest) -> Result<OperationResult> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();
        let PipelineRequest {
            image,
            point_coords,
            point_labels,
            dilate_kernel_size,
            operation,
        } = request;
        let (width, height) = image.dimensions();

        let (prompts, kernel) = {
            let _span = span!(Level::DEBUG, "validation", points = point_coords.len()).entered();
            let stage_start = Instant::now();
            let prompts =
                PromptValidator::validate_points(&point_coords, &point_labels, width, height)?;
            let kernel =
                PromptValidator::validate_dilate_kernel(dilate_kernel_size.map(i64::from))?;
            timings.validation_ms = elapsed_ms(stage_start);
            (prompts, kernel)
        };

        let segmenter = self
            .registry
            .segmenter()
            .ok_or(InpaintError::ModelNotLoaded(ModelKind::Segmenter))?;
        let terminal = self.terminal_model(&operation)?;
        let image = Arc::new(image);

        let stage_start = Instant::now();
        let candidates = self
            .with_deadline(
                "segmentation",
                Self::segment(segmenter, Arc::clone(&image), prompts),
            )
            .instrument(info_span!("segmentation"))
            .await?;
        let (selected_index, selected_score, mask) = Self::select_mask(candidates, &image)?;
        timings.segmentation_ms = elapsed_ms(stage_start);
        debug!(selected_index, selected_score, "Selected mask");

        let mask = {
            let _span = span!(Level::DEBUG, "dilation", kernel = ?kernel).entered();
            let stage_start = Instant::now();
            let mask = MaskDilator::dilate(&mask, kernel);
            timings.dilation_ms = elapsed_ms(stage_start);
            Arc::new(mask)
        };

        let stage_start = Instant::now();
        let result = self
            .with_deadline(
                operation.name(),
                self.run_terminal(terminal, &operation, Arc::clone(&image), Arc::clone(&mask)),
            )
            .instrument(info_span!("terminal", model = %operation.terminal_model()))
            .await?;
        if result.dimensions() != image.dimensions() {
            return Err(InpaintError::inference(
                operation.terminal_model(),
                format!(
                    "result is {}x{}, expected {width}x{height}",
                    result.width(),
                    result.height()
                ),
            ));
        }
        timings.terminal_ms = elapsed_ms(stage_start);

        let elapsed = total_start.elapsed();
        timings.total_ms = elapsed.as_millis() as u64;
        info!(
            total_ms = timings.total_ms,
            masked_pixels = mask.count(),
            "Pipeline complete"
        );

        Ok(OperationResult {
            result,
            mask: Arc::try_unwrap(mask).unwrap_or_else(|shared| (*shared).clone()),
            selected_index,
            selected_score,
            timings,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    fn terminal_model(&self, operation: &Operation) -> Result<TerminalModel> {
        let kind = operation.terminal_model();
        let missing = InpaintError::ModelNotLoaded(kind);
        match operation {
            Operation::Remove => self
                .registry
                .inpainter()
                .map(TerminalModel::Inpainter)
                .ok_or(missing),
            Operation::Fill { .. } | Operation::Replace { .. } => self
                .registry
                .diffusion_filler()
                .map(TerminalModel::Diffusion)
                .ok_or(missing),
        }
    }

    /// Bind and predict under one segmenter guard
    ///
    /// The guard moves into the blocking task, so it is released when both
    /// calls have returned, even if the caller stopped waiting.
    async fn segment(
        segmenter: SharedSegmenter,
        image: Arc<PixelBuffer>,
        prompts: PointPrompts,
    ) -> Result<MaskCandidates> {
        let mut guard = segmenter.lock_owned().await;
        run_blocking(ModelKind::Segmenter, move || {
            guard.set_image(&image)?;
            guard.predict(&prompts)
        })
        .await
    }

    /// Highest score wins, first index on ties
    fn select_mask(
        candidates: MaskCandidates,
        image: &PixelBuffer,
    ) -> Result<(usize, f32, Mask)> {
        if let Some(bad) = candidates.masks().iter().find(|m| !m.matches(image)) {
            return Err(InpaintError::inference(
                ModelKind::Segmenter,
                format!(
                    "mask is {}x{}, expected {}x{}",
                    bad.width(),
                    bad.height(),
                    image.width(),
                    image.height()
                ),
            ));
        }
        Ok(candidates.into_best())
    }

    async fn run_terminal(
        &self,
        terminal: TerminalModel,
        operation: &Operation,
        image: Arc<PixelBuffer>,
        mask: Arc<Mask>,
    ) -> Result<PixelBuffer> {
        let permit = Arc::clone(&self.inference_permits)
            .acquire_owned()
            .await
            .map_err(|_| InpaintError::internal("inference permits closed"))?;
        let kind = operation.terminal_model();
        let operation = operation.clone();

        run_blocking(kind, move || {
            let _permit = permit;
            match (terminal, operation) {
                (TerminalModel::Inpainter(model), Operation::Remove) => {
                    model.inpaint(&image, &mask)
                },
                (TerminalModel::Diffusion(model), Operation::Fill { prompt }) => {
                    model.fill(&image, &mask, &prompt)
                },
                (TerminalModel::Diffusion(model), Operation::Replace { prompt, steps }) => {
                    model.replace_background(&image, &mask, &prompt, steps)
                },
                _ => Err(InpaintError::internal("terminal model does not match operation")),
            }
        })
        .await
    }

    async fn with_deadline<T, F>(&self, stage: &'static str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            None => future.await,
            Some(after) => tokio::time::timeout(after, future)
                .await
                .map_err(|_| InpaintError::ProcessingTimeout { stage, after })?,
        }
    }
}

/// Run a model call on the blocking pool, turning panics into inference errors
async fn run_blocking<T, F>(kind: ModelKind, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(call).await.map_err(|e| {
        if e.is_panic() {
            InpaintError::inference(kind, "model call panicked")
        } else {
            InpaintError::internal(format!("{kind} task cancelled"))
        }
    })?
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
