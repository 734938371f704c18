//! Model registry
//!
//! Owns the one-time initialization of the three model handles. Each slot is
//! a [`tokio::sync::OnceCell`]: concurrent loads of the same kind wait on one
//! attempt, a success is memoized forever, and a failure leaves the slot empty
//! so a later call can retry. Loads run on the blocking pool.

use crate::{
    config::Device,
    error::{InpaintError, Result},
    inference::{DiffusionFiller, Inpainter, ModelDescriptor, ModelFactory, Segmenter},
    types::ModelKind,
};
use serde::Serialize;
use std::{sync::Arc, time::Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, instrument, warn};

/// Segmenter behind an async mutex
///
/// Binding an image and predicting against it must happen under one guard.
/// Take the guard with `lock_owned` and move it into the blocking task that
/// issues both calls.
pub type SharedSegmenter = Arc<Mutex<Box<dyn Segmenter>>>;

/// A loaded model handle
#[derive(Clone)]
pub enum ModelHandle {
    Segmenter(SharedSegmenter),
    Inpainter(Arc<dyn Inpainter>),
    DiffusionFiller(Arc<dyn DiffusionFiller>),
}

impl ModelHandle {
    #[must_use]
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Segmenter(_) => ModelKind::Segmenter,
            Self::Inpainter(_) => ModelKind::Inpainter,
            Self::DiffusionFiller(_) => ModelKind::DiffusionFiller,
        }
    }
}

/// Loaded flag per model, in reporting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadedFlags {
    pub sam: bool,
    pub lama: bool,
    pub stable_diffusion: bool,
}

impl LoadedFlags {
    #[must_use]
    pub fn get(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Segmenter => self.sam,
            ModelKind::Inpainter => self.lama,
            ModelKind::DiffusionFiller => self.stable_diffusion,
        }
    }

    #[must_use]
    pub fn all(&self) -> bool {
        self.sam && self.lama && self.stable_diffusion
    }
}

/// Device memory snapshot in bytes
///
/// All counters are zero on CPU and when no statistics source is available.
/// NVML reports device-wide usage and capacity only, so `cached` and
/// `max_allocated` stay zero there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub device: String,
    pub allocated: u64,
    pub cached: u64,
    pub max_allocated: u64,
    pub total: u64,
}

impl MemoryUsage {
    fn zeroed(device: Device) -> Self {
        Self {
            device: device.to_string(),
            allocated: 0,
            cached: 0,
            max_allocated: 0,
            total: 0,
        }
    }
}

/// Owner of the three model slots
pub struct ModelRegistry {
    factory: Arc<dyn ModelFactory>,
    segmenter: OnceCell<SharedSegmenter>,
    inpainter: OnceCell<Arc<dyn Inpainter>>,
    diffusion_filler: OnceCell<Arc<dyn DiffusionFiller>>,
    #[cfg(feature = "gpu-stats")]
    nvml: std::sync::OnceLock<Option<nvml_wrapper::Nvml>>,
}

impl ModelRegistry {
    /// Create an empty registry; nothing is loaded until asked
    #[must_use]
    pub fn new(factory: Arc<dyn ModelFactory>) -> Self {
        Self {
            factory,
            segmenter: OnceCell::new(),
            inpainter: OnceCell::new(),
            diffusion_filler: OnceCell::new(),
            #[cfg(feature = "gpu-stats")]
            nvml: std::sync::OnceLock::new(),
        }
    }

    /// Device the models run on
    #[must_use]
    pub fn device(&self) -> Device {
        self.factory.device()
    }

    /// Identifiers reported for `kind`
    #[must_use]
    pub fn describe(&self, kind: ModelKind) -> ModelDescriptor {
        self.factory.describe(kind)
    }

    /// Load one model if it is not loaded yet
    ///
    /// Concurrent calls for the same kind share one attempt.
    ///
    /// # Errors
    /// - `ModelLoad` naming `kind` when the factory fails or the load task panics
    #[instrument(skip(self))]
    pub async fn load(&self, kind: ModelKind) -> Result<()> {
        match kind {
            ModelKind::Segmenter => {
                init_slot(&self.segmenter, kind, &self.factory, |factory| {
                    factory
                        .load_segmenter()
                        .map(|segmenter| Arc::new(Mutex::new(segmenter)))
                })
                .await
            },
            ModelKind::Inpainter => {
                init_slot(&self.inpainter, kind, &self.factory, |factory| {
                    factory.load_inpainter().map(Arc::from)
                })
                .await
            },
            ModelKind::DiffusionFiller => {
                init_slot(&self.diffusion_filler, kind, &self.factory, |factory| {
                    factory.load_diffusion_filler().map(Arc::from)
                })
                .await
            },
        }
    }

    /// Load every model concurrently
    ///
    /// Returns at the first failure. Loads still in flight keep running in the
    /// background and fill their slots when they finish; slots that were
    /// already set stay set.
    ///
    /// # Errors
    /// - The first `ModelLoad` error
    pub async fn load_all(self: &Arc<Self>) -> Result<()> {
        let started = Instant::now();
        let spawn = |kind: ModelKind| {
            let registry = Arc::clone(self);
            tokio::spawn(async move { registry.load(kind).await })
        };
        let join = |kind: ModelKind, handle: tokio::task::JoinHandle<Result<()>>| async move {
            handle
                .await
                .map_err(|e| InpaintError::model_load(kind, format!("load task failed: {e}")))?
        };

        tokio::try_join!(
            join(ModelKind::Segmenter, spawn(ModelKind::Segmenter)),
            join(ModelKind::Inpainter, spawn(ModelKind::Inpainter)),
            join(ModelKind::DiffusionFiller, spawn(ModelKind::DiffusionFiller)),
        )?;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All models loaded"
        );
        Ok(())
    }

    /// Loaded handle for `kind`, without triggering a load
    #[must_use]
    pub fn get(&self, kind: ModelKind) -> Option<ModelHandle> {
        match kind {
            ModelKind::Segmenter => self.segmenter().map(ModelHandle::Segmenter),
            ModelKind::Inpainter => self.inpainter().map(ModelHandle::Inpainter),
            ModelKind::DiffusionFiller => self.diffusion_filler().map(ModelHandle::DiffusionFiller),
        }
    }

    #[must_use]
    pub fn segmenter(&self) -> Option<SharedSegmenter> {
        self.segmenter.get().cloned()
    }

    #[must_use]
    pub fn inpainter(&self) -> Option<Arc<dyn Inpainter>> {
        self.inpainter.get().cloned()
    }

    #[must_use]
    pub fn diffusion_filler(&self) -> Option<Arc<dyn DiffusionFiller>> {
        self.diffusion_filler.get().cloned()
    }

    #[must_use]
    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Segmenter => self.segmenter.initialized(),
            ModelKind::Inpainter => self.inpainter.initialized(),
            ModelKind::DiffusionFiller => self.diffusion_filler.initialized(),
        }
    }

    #[must_use]
    pub fn loaded_flags(&self) -> LoadedFlags {
        LoadedFlags {
            sam: self.is_loaded(ModelKind::Segmenter),
            lama: self.is_loaded(ModelKind::Inpainter),
            stable_diffusion: self.is_loaded(ModelKind::DiffusionFiller),
        }
    }

    /// True once all three handles are set
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.loaded_flags().all()
    }

    /// Best-effort device memory statistics
    #[must_use]
    pub fn memory_usage(&self) -> MemoryUsage {
        let device = self.device();
        match device {
            Device::Cuda => self.gpu_memory(device),
            Device::Cpu | Device::Auto => MemoryUsage::zeroed(device),
        }
    }

    #[cfg(feature = "gpu-stats")]
    fn gpu_memory(&self, device: Device) -> MemoryUsage {
        let nvml = self.nvml.get_or_init(|| {
            nvml_wrapper::Nvml::init()
                .map_err(|e| warn!(error = %e, "NVML unavailable, device memory reported as zero"))
                .ok()
        });
        let info = nvml
            .as_ref()
            .and_then(|nvml| nvml.device_by_index(0).and_then(|gpu| gpu.memory_info()).ok());
        match info {
            Some(info) => MemoryUsage {
                allocated: info.used,
                total: info.total,
                ..MemoryUsage::zeroed(device)
            },
            None => MemoryUsage::zeroed(device),
        }
    }

    #[cfg(not(feature = "gpu-stats"))]
    #[allow(clippy::unused_self)]
    fn gpu_memory(&self, device: Device) -> MemoryUsage {
        MemoryUsage::zeroed(device)
    }
}

async fn init_slot<T, F>(
    cell: &OnceCell<T>,
    kind: ModelKind,
    factory: &Arc<dyn ModelFactory>,
    load: F,
) -> Result<()>
where
    T: Send + 'static,
    F: FnOnce(&dyn ModelFactory) -> Result<T> + Send + 'static,
{
    if cell.initialized() {
        return Ok(());
    }
    let factory = Arc::clone(factory);
    cell.get_or_try_init(move || async move {
        let started = Instant::now();
        info!("Loading {kind} model");
        let handle = tokio::task::spawn_blocking(move || load(factory.as_ref()))
            .await
            .map_err(|e| InpaintError::model_load(kind, format!("load task failed: {e}")))?
            .map_err(|e| match e {
                InpaintError::ModelLoad { .. } => e,
                other => InpaintError::model_load(kind, other.to_string()),
            });
        match &handle {
            Ok(_) => info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "{kind} model loaded"
            ),
            Err(e) => warn!(error = %e, "{kind} model failed to load"),
        }
        handle
    })
    .await
    .map(|_| ())
}
