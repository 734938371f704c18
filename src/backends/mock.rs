//! Deterministic mock models
//!
//! Used when the service runs with `USE_MOCK_SERVICE=true` and throughout the
//! test suite. Outputs are cheap to compute and depend only on their inputs,
//! and every call is recorded in a log shared by all models created from the
//! same [`MockModelFactory`].

use super::describe_paths;
use crate::{
    config::{Device, ModelPaths},
    error::{InpaintError, Result},
    inference::{DiffusionFiller, Inpainter, ModelDescriptor, ModelFactory, Segmenter},
    types::{Mask, MaskCandidates, ModelKind, PixelBuffer, PointPrompts, TextPrompt},
};
use image::Rgb;
use std::{
    collections::hash_map::DefaultHasher,
    collections::HashSet,
    hash::{Hash, Hasher},
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

/// Scores given to the three candidate masks, smallest square first
pub const MOCK_SCORES: [f32; 3] = [0.72, 0.91, 0.85];

/// One recorded model call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Load(ModelKind),
    /// Segmenter bound an image with this fingerprint
    SetImage { image: u64 },
    /// Segmenter answered a prompt anchored at `anchor` against the bound image
    Predict { image: u64, anchor: (u32, u32) },
    Inpaint { image: u64 },
    Fill { image: u64, prompt: String },
    Replace { image: u64, prompt: String, steps: u32 },
}

impl MockCall {
    /// Whether this is an inference call rather than a load
    #[must_use]
    pub fn is_inference(&self) -> bool {
        !matches!(self, Self::Load(_))
    }
}

type CallLog = Arc<Mutex<Vec<MockCall>>>;

fn record(log: &CallLog, call: MockCall) {
    if let Ok(mut history) = log.lock() {
        history.push(call);
    }
}

/// Stable fingerprint of an image's dimensions and pixels
#[must_use]
pub fn fingerprint(image: &PixelBuffer) -> u64 {
    let mut hasher = DefaultHasher::new();
    image.dimensions().hash(&mut hasher);
    image.as_rgb().as_raw().hash(&mut hasher);
    hasher.finish()
}

/// Blocks model loads until opened
///
/// Lets tests observe the service while loads are still in flight.
#[derive(Debug, Clone, Default)]
pub struct LoadGate {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl LoadGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every waiting and future load
    pub fn open(&self) {
        let (lock, condvar) = &*self.state;
        if let Ok(mut open) = lock.lock() {
            *open = true;
            condvar.notify_all();
        }
    }

    fn wait(&self) {
        let (lock, condvar) = &*self.state;
        if let Ok(guard) = lock.lock() {
            let _released = condvar.wait_while(guard, |open| !*open);
        }
    }
}

/// Mock segmenter producing three nested squares around the prompt anchor
pub struct MockSegmenter {
    bound: Option<(u64, u32, u32)>,
    log: CallLog,
    bind_delay: Option<Duration>,
    fail: bool,
}

impl MockSegmenter {
    fn candidate_masks(width: u32, height: u32, anchor: (u32, u32)) -> Vec<Mask> {
        let base = (width.min(height) / 10).max(1);
        (1..=3)
            .map(|step| {
                let half = base * step;
                Mask::from_fn(width, height, |x, y| {
                    x.abs_diff(anchor.0) <= half && y.abs_diff(anchor.1) <= half
                })
            })
            .collect()
    }
}

impl Segmenter for MockSegmenter {
    fn set_image(&mut self, image: &PixelBuffer) -> Result<()> {
        let id = fingerprint(image);
        record(&self.log, MockCall::SetImage { image: id });
        if let Some(delay) = self.bind_delay {
            std::thread::sleep(delay);
        }
        self.bound = Some((id, image.width(), image.height()));
        Ok(())
    }

    fn predict(&mut self, prompts: &PointPrompts) -> Result<MaskCandidates> {
        let (id, width, height) = self.bound.ok_or_else(|| {
            InpaintError::inference(ModelKind::Segmenter, "predict called before set_image")
        })?;
        let point = prompts
            .anchor()
            .ok_or_else(|| InpaintError::inference(ModelKind::Segmenter, "no prompt points"))?;
        let anchor = (
            (point.x.round() as u32).min(width - 1),
            (point.y.round() as u32).min(height - 1),
        );
        record(&self.log, MockCall::Predict { image: id, anchor });
        if self.fail {
            return Err(InpaintError::inference(
                ModelKind::Segmenter,
                "mock segmenter failure",
            ));
        }

        MaskCandidates::new(
            Self::candidate_masks(width, height, anchor),
            MOCK_SCORES.to_vec(),
        )
    }
}

/// Mock inpainter painting the masked region with the mean unmasked colour
pub struct MockInpainter {
    log: CallLog,
    fail: bool,
}

impl MockInpainter {
    fn mean_colour(image: &PixelBuffer, mask: &Mask) -> Rgb<u8> {
        let mut sums = [0u64; 3];
        let mut count = 0u64;
        for (x, y, pixel) in image.as_rgb().enumerate_pixels() {
            if !mask.get(x, y) {
                for (sum, channel) in sums.iter_mut().zip(pixel.0) {
                    *sum += u64::from(channel);
                }
                count += 1;
            }
        }
        if count == 0 {
            return Rgb([128, 128, 128]);
        }
        Rgb(sums.map(|sum| (sum / count) as u8))
    }
}

impl Inpainter for MockInpainter {
    fn inpaint(&self, image: &PixelBuffer, mask: &Mask) -> Result<PixelBuffer> {
        record(
            &self.log,
            MockCall::Inpaint {
                image: fingerprint(image),
            },
        );
        if self.fail {
            return Err(InpaintError::inference(
                ModelKind::Inpainter,
                "mock inpainter failure",
            ));
        }
        let colour = Self::mean_colour(image, mask);
        Ok(paint(image, |x, y| mask.get(x, y), colour))
    }
}

/// Mock diffusion model painting a colour derived from the prompt
pub struct MockDiffusionFiller {
    log: CallLog,
    fail: bool,
}

impl MockDiffusionFiller {
    fn prompt_colour(prompt: &TextPrompt) -> Rgb<u8> {
        let mut hasher = DefaultHasher::new();
        prompt.as_str().hash(&mut hasher);
        let [r, g, b, ..] = hasher.finish().to_le_bytes();
        Rgb([r, g, b])
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            return Err(InpaintError::inference(
                ModelKind::DiffusionFiller,
                "mock diffusion failure",
            ));
        }
        Ok(())
    }
}

impl DiffusionFiller for MockDiffusionFiller {
    fn fill(&self, image: &PixelBuffer, mask: &Mask, prompt: &TextPrompt) -> Result<PixelBuffer> {
        record(
            &self.log,
            MockCall::Fill {
                image: fingerprint(image),
                prompt: prompt.to_string(),
            },
        );
        self.check()?;
        Ok(paint(image, |x, y| mask.get(x, y), Self::prompt_colour(prompt)))
    }

    fn replace_background(
        &self,
        image: &PixelBuffer,
        mask: &Mask,
        prompt: &TextPrompt,
        steps: u32,
    ) -> Result<PixelBuffer> {
        record(
            &self.log,
            MockCall::Replace {
                image: fingerprint(image),
                prompt: prompt.to_string(),
                steps,
            },
        );
        self.check()?;
        Ok(paint(image, |x, y| !mask.get(x, y), Self::prompt_colour(prompt)))
    }
}

fn paint<F: Fn(u32, u32) -> bool>(image: &PixelBuffer, select: F, colour: Rgb<u8>) -> PixelBuffer {
    let mut output = image.as_rgb().clone();
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        if select(x, y) {
            *pixel = colour;
        }
    }
    // Same dimensions as a buffer that already passed validation
    PixelBuffer::from_rgb(output).unwrap_or_else(|_| image.clone())
}

/// Factory for the mock models
///
/// Clones share the call log, so a test can keep one clone for assertions
/// and hand another to the application context.
#[derive(Clone, Default)]
pub struct MockModelFactory {
    log: CallLog,
    models: ModelPaths,
    failing_loads: HashSet<ModelKind>,
    failing_inference: HashSet<ModelKind>,
    load_delay: Option<Duration>,
    load_gate: Option<LoadGate>,
    bind_delay: Option<Duration>,
    device: Option<Device>,
}

impl MockModelFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report these identifiers from `describe`
    #[must_use]
    pub fn with_paths(mut self, models: ModelPaths) -> Self {
        self.models = models;
        self
    }

    /// Make loading `kind` fail
    #[must_use]
    pub fn with_failing_load(mut self, kind: ModelKind) -> Self {
        self.failing_loads.insert(kind);
        self
    }

    /// Make every inference call on `kind` fail
    #[must_use]
    pub fn with_failing_inference(mut self, kind: ModelKind) -> Self {
        self.failing_inference.insert(kind);
        self
    }

    /// Sleep this long in every load
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Block every load until `gate` is opened
    #[must_use]
    pub fn with_load_gate(mut self, gate: LoadGate) -> Self {
        self.load_gate = Some(gate);
        self
    }

    /// Sleep this long inside `Segmenter::set_image`
    #[must_use]
    pub fn with_bind_delay(mut self, delay: Duration) -> Self {
        self.bind_delay = Some(delay);
        self
    }

    /// Report `device` instead of the CPU
    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Every call recorded so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.log.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Number of inference calls recorded so far
    #[must_use]
    pub fn inference_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.is_inference()).count()
    }

    /// Number of times `kind` has been loaded
    #[must_use]
    pub fn load_count(&self, kind: ModelKind) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == MockCall::Load(kind))
            .count()
    }

    fn begin_load(&self, kind: ModelKind) -> Result<()> {
        if let Some(gate) = &self.load_gate {
            gate.wait();
        }
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        record(&self.log, MockCall::Load(kind));
        if self.failing_loads.contains(&kind) {
            return Err(InpaintError::model_load(kind, "mock checkpoint missing"));
        }
        log::debug!("Loaded mock {kind} model");
        Ok(())
    }
}

impl ModelFactory for MockModelFactory {
    fn load_segmenter(&self) -> Result<Box<dyn Segmenter>> {
        self.begin_load(ModelKind::Segmenter)?;
        Ok(Box::new(MockSegmenter {
            bound: None,
            log: Arc::clone(&self.log),
            bind_delay: self.bind_delay,
            fail: self.failing_inference.contains(&ModelKind::Segmenter),
        }))
    }

    fn load_inpainter(&self) -> Result<Box<dyn Inpainter>> {
        self.begin_load(ModelKind::Inpainter)?;
        Ok(Box::new(MockInpainter {
            log: Arc::clone(&self.log),
            fail: self.failing_inference.contains(&ModelKind::Inpainter),
        }))
    }

    fn load_diffusion_filler(&self) -> Result<Box<dyn DiffusionFiller>> {
        self.begin_load(ModelKind::DiffusionFiller)?;
        Ok(Box::new(MockDiffusionFiller {
            log: Arc::clone(&self.log),
            fail: self.failing_inference.contains(&ModelKind::DiffusionFiller),
        }))
    }

    fn describe(&self, kind: ModelKind) -> ModelDescriptor {
        describe_paths(&self.models, kind, "mock")
    }

    fn device(&self) -> Device {
        self.device.unwrap_or(Device::Cpu)
    }
}
