//! Prometheus metrics endpoint

use axum::{extract::State, response::IntoResponse};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::AppState;

/// Application metrics for Prometheus
#[derive(Default)]
pub struct Metrics {
    /// Total API requests served
    requests_total: AtomicU64,
    /// Store calls that failed
    store_errors_total: AtomicU64,
    /// Selected rows whose negative prediction was clamped to zero
    clamped_predictions_total: AtomicU64,
    /// Filter inputs and stored rows that normalized to UNK
    unknown_categories_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_errors(&self) {
        self.store_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_clamped(&self, count: u64) {
        self.clamped_predictions_total
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_unknown_categories(&self, count: u64) {
        self.unknown_categories_total
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            store_errors_total: self.store_errors_total.load(Ordering::Relaxed),
            clamped_predictions_total: self.clamped_predictions_total.load(Ordering::Relaxed),
            unknown_categories_total: self.unknown_categories_total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub store_errors_total: u64,
    pub clamped_predictions_total: u64,
    pub unknown_categories_total: u64,
}

impl MetricsSnapshot {
    pub fn render(&self, backend: &str) -> String {
        format!(
            r#"# HELP gate_forecast_requests_total Total number of API requests served
# TYPE gate_forecast_requests_total counter
gate_forecast_requests_total {}

# HELP gate_forecast_store_errors_total Total number of failed forecast store calls
# TYPE gate_forecast_store_errors_total counter
gate_forecast_store_errors_total {}

# HELP gate_forecast_clamped_predictions_total Negative predictions clamped to zero
# TYPE gate_forecast_clamped_predictions_total counter
gate_forecast_clamped_predictions_total {}

# HELP gate_forecast_unknown_categories_total Move type or designation values mapped to UNK
# TYPE gate_forecast_unknown_categories_total counter
gate_forecast_unknown_categories_total {}

# HELP gate_forecast_info Build information
# TYPE gate_forecast_info gauge
gate_forecast_info{{version="{}",backend="{}"}} 1
"#,
            self.requests_total,
            self.store_errors_total,
            self.clamped_predictions_total,
            self.unknown_categories_total,
            env!("CARGO_PKG_VERSION"),
            backend,
        )
    }
}

/// GET /metrics
///
/// Returns Prometheus-format metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let output = state.metrics.get_metrics().render(state.store.backend());

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    )
}
