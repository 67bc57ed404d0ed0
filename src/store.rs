//! Forecast store abstraction and the in-process implementation

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::planner::{aggregate_records, AggregateRow, AggregationPlan, ForecastRecord};

/// Failures talking to the forecast store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("forecast store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Table freshness summary
#[derive(Debug, Clone, PartialEq)]
pub struct Freshness {
    pub latest_update: Option<DateTime<Utc>>,
    pub recent_rows: i64,
}

/// Read-only query interface over the forecast table.
///
/// Implementations must select the latest run per cell, normalize
/// categories and clamp negatives exactly as [`aggregate_records`] does.
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Run a deduplicated aggregation.
    async fn aggregate(&self, plan: &AggregationPlan) -> Result<Vec<AggregateRow>, StoreError>;

    /// Latest `updated_at` and row count over rows bucketed on or after `since`.
    async fn freshness(&self, since: NaiveDate) -> Result<Freshness, StoreError>;

    /// Distinct terminal ids, ascending.
    async fn terminals(&self) -> Result<Vec<String>, StoreError>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for logs and readiness output.
    fn backend(&self) -> &'static str;
}

/// Forecast rows held in process memory
#[derive(Default)]
pub struct MemoryForecastStore {
    records: RwLock<Vec<ForecastRecord>>,
}

impl MemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ForecastRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn extend(&self, records: impl IntoIterator<Item = ForecastRecord>) {
        self.records.write().extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ForecastStore for MemoryForecastStore {
    async fn aggregate(&self, plan: &AggregationPlan) -> Result<Vec<AggregateRow>, StoreError> {
        let records = self.records.read();
        Ok(aggregate_records(&records, plan))
    }

    async fn freshness(&self, since: NaiveDate) -> Result<Freshness, StoreError> {
        let records = self.records.read();
        let recent: Vec<&ForecastRecord> = records.iter().filter(|r| r.date >= since).collect();
        Ok(Freshness {
            latest_update: recent.iter().map(|r| r.updated_at).max(),
            recent_rows: recent.len() as i64,
        })
    }

    async fn terminals(&self) -> Result<Vec<String>, StoreError> {
        let records = self.records.read();
        let distinct: BTreeSet<&str> = records.iter().map(|r| r.terminal_id.as_str()).collect();
        Ok(distinct.into_iter().map(str::to_string).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
