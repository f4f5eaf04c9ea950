//! Prometheus metrics for email delivery.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops. When another
/// recorder is already installed the error is logged and metrics are
/// simply not rendered.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .inspect(|_| info!("Prometheus metrics initialized"))
            .inspect_err(|e| warn!(error = %e, "Failed to install Prometheus recorder"))
    });
}

/// Render metrics in Prometheus text format, if the recorder is installed
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Metrics helper bound to one provider
#[derive(Clone)]
pub struct DeliveryMetrics {
    provider: &'static str,
}

impl DeliveryMetrics {
    pub fn new(provider: &'static str) -> Self {
        Self { provider }
    }

    /// Record one `check_delivered` call
    pub fn checked(&self) {
        counter!(
            "email_operator_delivery_checks_total",
            "provider" => self.provider
        )
        .increment(1);
    }

    /// Record a confirmed delivery
    pub fn delivered(&self, duration: Duration) {
        counter!(
            "email_operator_deliveries_total",
            "provider" => self.provider,
            "outcome" => "delivered"
        )
        .increment(1);
        self.duration(duration);
    }

    /// Record a failed delivery, labelled with the error kind
    pub fn failed(&self, kind: &'static str, duration: Duration) {
        counter!(
            "email_operator_deliveries_total",
            "provider" => self.provider,
            "outcome" => kind
        )
        .increment(1);
        self.duration(duration);
    }

    fn duration(&self, duration: Duration) {
        histogram!(
            "email_operator_delivery_duration_seconds",
            "provider" => self.provider
        )
        .record(duration.as_secs_f64());
    }
}

/// Record a reconcile that returned an error
pub fn reconcile_failed(kind: &'static str) {
    counter!("email_operator_reconcile_errors_total", "kind" => kind).increment(1);
}
