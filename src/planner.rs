//! Deduplicated aggregation planner
//!
//! A forecast cell is (terminal, move type, designation, date, hour). The
//! forecasting pipeline may write several runs for the same cell; only the
//! run with the greatest `updated_at` counts. Plans describe which cells to
//! select and how to group them; a [`ForecastStore`] executes them.

use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::normalize::{Desig, FilterSet, MoveType};
use crate::routes::metrics::Metrics;
use crate::store::{ForecastStore, StoreError};
use crate::window::TimeWindow;

/// One raw row of the forecast table, categories as stored
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub terminal_id: String,
    pub move_type: String,
    pub desig: String,
    pub date: NaiveDate,
    pub hour: u32,
    pub token_count_pred: f64,
    pub token_count_true: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Dimensions to group the deduplicated cells by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GroupBy {
    pub terminal: bool,
    /// Calendar date plus hour of day
    pub date_hour: bool,
    /// Hour of day only, summed across dates
    pub hour: bool,
    pub move_type: bool,
    pub desig: bool,
}

impl GroupBy {
    pub const TERMINAL: GroupBy = GroupBy {
        terminal: true,
        date_hour: false,
        hour: false,
        move_type: false,
        desig: false,
    };
    pub const TERMINAL_HOUR: GroupBy = GroupBy {
        hour: true,
        ..Self::TERMINAL
    };
    pub const TERMINAL_MOVE_TYPE: GroupBy = GroupBy {
        move_type: true,
        ..Self::TERMINAL
    };
    pub const TERMINAL_DESIG: GroupBy = GroupBy {
        desig: true,
        ..Self::TERMINAL
    };
    pub const TERMINAL_MOVE_TYPE_DESIG: GroupBy = GroupBy {
        move_type: true,
        desig: true,
        ..Self::TERMINAL
    };
    pub const DATE_HOUR: GroupBy = GroupBy {
        terminal: false,
        date_hour: true,
        hour: false,
        move_type: false,
        desig: false,
    };
    pub const DATE_HOUR_MOVE_TYPE: GroupBy = GroupBy {
        move_type: true,
        ..Self::DATE_HOUR
    };
    pub const DATE_HOUR_DESIG: GroupBy = GroupBy {
        desig: true,
        ..Self::DATE_HOUR
    };
    pub const MOVE_TYPE: GroupBy = GroupBy {
        terminal: false,
        date_hour: false,
        hour: false,
        move_type: true,
        desig: false,
    };
    pub const DESIG: GroupBy = GroupBy {
        move_type: false,
        desig: true,
        ..Self::MOVE_TYPE
    };
}

/// A fully-resolved aggregation request
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPlan {
    pub window: TimeWindow,
    pub filters: FilterSet,
    pub group_by: GroupBy,
}

/// Summed totals for one group. Dimensions not grouped on are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub terminal_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub hour: Option<u32>,
    pub move_type: Option<MoveType>,
    pub desig: Option<Desig>,
    /// Sum of clamped predictions, unrounded
    pub total: f64,
    /// Sum of observed counts, `None` when no selected row had one
    pub actual: Option<f64>,
    pub latest_update: Option<DateTime<Utc>>,
    /// Selected rows whose prediction was negative
    pub clamped: i64,
    /// Selected rows whose move type or designation normalized to UNK
    pub unknown: i64,
}

/// Negative predictions are an upstream data-quality condition, never shown.
#[inline]
pub fn clamp_prediction(value: f64) -> f64 {
    if value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Record with its categories normalized
#[derive(Debug, Clone)]
pub struct NormalizedRecord<'a> {
    pub record: &'a ForecastRecord,
    pub move_type: MoveType,
    pub desig: Desig,
}

type CellKey<'a> = (&'a str, MoveType, Desig, NaiveDate, u32);

/// Latest run wins; equal timestamps fall back to the larger prediction so
/// the choice never depends on row order.
fn supersedes(candidate: &ForecastRecord, current: &ForecastRecord) -> bool {
    match candidate.updated_at.cmp(&current.updated_at) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            candidate
                .token_count_pred
                .total_cmp(&current.token_count_pred)
                == Ordering::Greater
        }
    }
}

/// Selects the current row of every cell inside the window that passes the
/// filters. Filters compare against normalized categories.
pub fn latest_per_cell<'a>(
    records: &'a [ForecastRecord],
    window: &TimeWindow,
    filters: &FilterSet,
) -> Vec<NormalizedRecord<'a>> {
    let mut cells: HashMap<CellKey<'a>, NormalizedRecord<'a>> = HashMap::new();

    for record in records {
        if !window.contains_bucket(record.date, record.hour) {
            continue;
        }
        let move_type = MoveType::normalize(&record.move_type);
        let desig = Desig::normalize(&record.desig);
        if !filters.matches(&record.terminal_id, move_type, desig) {
            continue;
        }

        let key = (
            record.terminal_id.as_str(),
            move_type,
            desig,
            record.date,
            record.hour,
        );
        let candidate = NormalizedRecord {
            record,
            move_type,
            desig,
        };
        match cells.entry(key) {
            Entry::Occupied(mut slot) => {
                if supersedes(record, slot.get().record) {
                    slot.insert(candidate);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
        }
    }

    cells.into_values().collect()
}

type GroupKey = (
    Option<String>,
    Option<NaiveDate>,
    Option<u32>,
    Option<MoveType>,
    Option<Desig>,
);

/// Executes a plan over raw records.
pub fn aggregate_records(records: &[ForecastRecord], plan: &AggregationPlan) -> Vec<AggregateRow> {
    let g = plan.group_by;
    let mut groups: BTreeMap<GroupKey, AggregateRow> = BTreeMap::new();

    for cell in latest_per_cell(records, &plan.window, &plan.filters) {
        let r = cell.record;
        let key: GroupKey = (
            g.terminal.then(|| r.terminal_id.clone()),
            g.date_hour.then_some(r.date),
            (g.date_hour || g.hour).then_some(r.hour),
            g.move_type.then_some(cell.move_type),
            g.desig.then_some(cell.desig),
        );

        let row = groups.entry(key.clone()).or_insert_with(|| AggregateRow {
            terminal_id: key.0,
            date: key.1,
            hour: key.2,
            move_type: key.3,
            desig: key.4,
            total: 0.0,
            actual: None,
            latest_update: None,
            clamped: 0,
            unknown: 0,
        });

        row.total += clamp_prediction(r.token_count_pred);
        if let Some(actual) = r.token_count_true {
            *row.actual.get_or_insert(0.0) += actual;
        }
        row.latest_update = row.latest_update.max(Some(r.updated_at));
        if r.token_count_pred < 0.0 {
            row.clamped += 1;
        }
        if cell.move_type == MoveType::Unk || cell.desig == Desig::Unk {
            row.unknown += 1;
        }
    }

    groups.into_values().collect()
}

/// Builds plans and runs them against the configured store
#[derive(Clone)]
pub struct Planner {
    store: Arc<dyn ForecastStore>,
    metrics: Arc<Metrics>,
}

impl Planner {
    pub fn new(store: Arc<dyn ForecastStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    pub fn plan(&self, window: TimeWindow, filters: FilterSet, group_by: GroupBy) -> AggregationPlan {
        AggregationPlan {
            window,
            filters,
            group_by,
        }
    }

    pub async fn run(
        &self,
        window: TimeWindow,
        filters: FilterSet,
        group_by: GroupBy,
    ) -> Result<Vec<AggregateRow>, StoreError> {
        let plan = self.plan(window, filters, group_by);
        self.execute(&plan).await
    }

    pub async fn execute(&self, plan: &AggregationPlan) -> Result<Vec<AggregateRow>, StoreError> {
        if plan.filters.unknown_inputs > 0 {
            self.metrics
                .inc_unknown_categories(u64::from(plan.filters.unknown_inputs));
        }

        let rows = match self.store.aggregate(plan).await {
            Ok(rows) => rows,
            Err(e) => {
                self.metrics.inc_store_errors();
                return Err(e);
            }
        };

        let clamped: i64 = rows.iter().map(|r| r.clamped).sum();
        let unknown: i64 = rows.iter().map(|r| r.unknown).sum();
        if clamped > 0 {
            warn!(
                clamped = clamped,
                start = %plan.window.start(),
                end = %plan.window.end(),
                "Negative predictions clamped to zero"
            );
            self.metrics.inc_clamped(clamped as u64);
        }
        if unknown > 0 {
            debug!(unknown = unknown, "Stored categories mapped to UNK");
            self.metrics.inc_unknown_categories(unknown as u64);
        }
        debug!(groups = rows.len(), group_by = ?plan.group_by, "Aggregation complete");

        Ok(rows)
    }
}
