//! Application state shared across handlers

use chrono::Duration;
use std::sync::Arc;

use crate::capacity::{CapacityStore, InMemoryCapacityStore};
use crate::config::Settings;
use crate::meta::MetaAttacher;
use crate::planner::Planner;
use crate::routes::metrics::Metrics;
use crate::store::ForecastStore;
use crate::window::WindowResolver;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Forecast table access (Postgres or in-memory)
    pub store: Arc<dyn ForecastStore>,
    pub planner: Planner,
    pub capacity: Arc<dyn CapacityStore>,
    /// Application metrics for Prometheus
    pub metrics: Arc<Metrics>,
    /// Window parsing for `/forecast/range`
    pub range_windows: WindowResolver,
    /// Window parsing for `/analytics/*`
    pub analytics_windows: WindowResolver,
    pub meta: MetaAttacher,
}

impl AppState {
    /// Create new application state with an in-process capacity store
    pub fn new(settings: Settings, store: Arc<dyn ForecastStore>) -> Self {
        Self::with_capacity_store(settings, store, Arc::new(InMemoryCapacityStore::new()))
    }

    pub fn with_capacity_store(
        settings: Settings,
        store: Arc<dyn ForecastStore>,
        capacity: Arc<dyn CapacityStore>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let tz = settings.timezone;

        Self {
            planner: Planner::new(Arc::clone(&store), Arc::clone(&metrics)),
            range_windows: WindowResolver::new(tz)
                .with_max_span(Duration::days(settings.range_max_days)),
            analytics_windows: WindowResolver::new(tz)
                .with_max_span(Duration::days(settings.analytics_max_days)),
            meta: MetaAttacher::new(tz),
            settings: Arc::new(settings),
            store,
            capacity,
            metrics,
        }
    }

    /// Stored capacity for a terminal, or the configured default.
    pub async fn capacity_for(&self, terminal_id: &str) -> u32 {
        self.capacity
            .get(terminal_id)
            .await
            .map_or(self.settings.default_capacity_per_hour, |e| e.capacity_per_hour)
    }
}
