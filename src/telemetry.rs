//! Prometheus metrics for the service
//!
//! Each [`AppContext`](crate::context::AppContext) owns its own recorder
//! instead of installing a global one, so several contexts (one per test,
//! for instance) never share series.

use crate::{registry::ModelRegistry, types::ModelKind};
use metrics::{counter, describe_counter, describe_gauge, gauge, with_local_recorder, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::time::Duration;

/// Operations counted under `inpaint_requests_total`
pub const COUNTED_OPERATIONS: [&str; 3] = ["remove", "fill", "replace"];

const MODELS_LOADED: &str = "inpaint_models_loaded";
const MEMORY_BYTES: &str = "inpaint_memory_bytes";
const UPTIME_SECONDS: &str = "inpaint_uptime_seconds";
const REQUESTS_TOTAL: &str = "inpaint_requests_total";

/// Context-scoped Prometheus recorder
pub struct ServiceMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl ServiceMetrics {
    /// Build a recorder with every request series registered at zero
    #[must_use]
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let metrics = Self { recorder, handle };
        metrics.scoped(|| {
            describe_gauge!(MODELS_LOADED, "Whether a model is loaded");
            describe_gauge!(MEMORY_BYTES, Unit::Bytes, "Device memory in bytes");
            describe_gauge!(UPTIME_SECONDS, Unit::Seconds, "Seconds since startup");
            describe_counter!(REQUESTS_TOTAL, "Finished pipeline requests");
            for operation in COUNTED_OPERATIONS {
                for outcome in ["success", "error"] {
                    counter!(REQUESTS_TOTAL, "operation" => operation, "outcome" => outcome)
                        .increment(0);
                }
            }
        });
        metrics
    }

    /// Count one finished request; unknown operation names are ignored
    pub fn record_request(&self, operation: &str, succeeded: bool) {
        let Some(operation) = COUNTED_OPERATIONS.into_iter().find(|op| *op == operation) else {
            return;
        };
        let outcome = if succeeded { "success" } else { "error" };
        self.scoped(|| {
            counter!(REQUESTS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
        });
    }

    /// Refresh the gauges from `registry` and render the exposition text
    #[must_use]
    pub fn render(&self, registry: &ModelRegistry, uptime: Duration) -> String {
        let memory = registry.memory_usage();
        self.scoped(|| {
            for kind in ModelKind::ALL {
                let loaded = if registry.is_loaded(kind) { 1.0 } else { 0.0 };
                gauge!(MODELS_LOADED, "model" => kind.as_str()).set(loaded);
            }
            let usage = [
                ("allocated", memory.allocated),
                ("cached", memory.cached),
                ("total", memory.total),
            ];
            for (kind, bytes) in usage {
                gauge!(MEMORY_BYTES, "type" => kind, "device" => memory.device.clone())
                    .set(bytes as f64);
            }
            gauge!(UPTIME_SECONDS).set(uptime.as_secs_f64());
        });
        self.handle.render()
    }

    fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        with_local_recorder(&self.recorder, f)
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockModelFactory;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_render_reflects_state() {
        let registry = ModelRegistry::new(Arc::new(MockModelFactory::new()));
        let metrics = ServiceMetrics::new();

        let text = metrics.render(&registry, Duration::from_secs(3));
        assert!(text.contains("inpaint_models_loaded{model=\"sam\"} 0"));
        assert!(text.contains("inpaint_memory_bytes{type=\"allocated\",device=\"cpu\"} 0"));
        assert!(
            text.contains(r#"inpaint_requests_total{operation="replace",outcome="success"} 0"#)
        );
        assert!(text.contains("# TYPE inpaint_requests_total counter"));

        registry.load(ModelKind::Segmenter).await.unwrap();
        metrics.record_request("remove", true);
        metrics.record_request("remove", true);
        metrics.record_request("fill", false);
        metrics.record_request("unknown", true);

        let text = metrics.render(&registry, Duration::from_secs(4));
        assert!(text.contains("inpaint_models_loaded{model=\"sam\"} 1"));
        assert!(text.contains("inpaint_models_loaded{model=\"lama\"} 0"));
        assert!(text.contains(r#"inpaint_requests_total{operation="remove",outcome="success"} 2"#));
        assert!(text.contains("inpaint_requests_total{operation=\"fill\",outcome=\"error\"} 1"));
        assert!(!text.contains("unknown"));
        assert!(text.contains("inpaint_uptime_seconds 4"));
    }

    #[test]
    fn test_contexts_do_not_share_series() {
        let registry = ModelRegistry::new(Arc::new(MockModelFactory::new()));
        let first = ServiceMetrics::new();
        let second = ServiceMetrics::new();
        first.record_request("remove", false);

        let text = second.render(&registry, Duration::ZERO);
        assert!(text.contains(r#"inpaint_requests_total{operation="remove",outcome="error"} 0"#));
    }
}
