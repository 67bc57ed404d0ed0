//! Single-terminal forecast series endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::meta::WithMeta;
use crate::normalize::{normalize_terminal_filter, FilterSet};
use crate::planner::GroupBy;
use crate::shaper::{forecast_series, ForecastPoint};
use crate::state::AppState;
use crate::window::{to_fixed, TimeWindow};

/// Hours covered by `/forecast/next8h`
pub const NEXT_HOURS: i64 = 8;

/// Query parameters for forecast endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ForecastQuery {
    pub terminal_id: Option<String>,
    pub move_type: Option<String>,
    pub desig: Option<String>,
    pub start_iso: Option<String>,
    pub end_iso: Option<String>,
}

impl ForecastQuery {
    /// A concrete terminal is required; `ALL` does not count as one.
    fn filters(&self) -> Result<(String, FilterSet)> {
        let terminal_id = normalize_terminal_filter(self.terminal_id.as_deref())
            .ok_or(AppError::MissingParameter("terminal_id"))?;
        let filters = FilterSet::from_raw(None, self.move_type.as_deref(), self.desig.as_deref())
            .with_terminal(terminal_id.as_str());
        Ok((terminal_id, filters))
    }
}

/// Response for forecast endpoints
#[derive(Debug, Serialize)]
pub struct ForecastResponse {
    pub horizon_hours: Vec<ForecastPoint>,
    pub generated_at: DateTime<FixedOffset>,
    /// Latest forecast run in the series, or `generated_at` when empty
    pub updated_at: DateTime<FixedOffset>,
    pub capacity_per_hour: u32,
}

/// GET /forecast/next8h
///
/// Hourly series for one terminal starting at the current local hour.
pub async fn next_8h(
    State(state): State<AppState>,
    Query(params): Query<ForecastQuery>,
) -> Result<Json<WithMeta<ForecastResponse>>> {
    let (terminal_id, filters) = params.filters()?;
    let resolver = state.range_windows;
    let window = resolver.next_hours(resolver.now(), NEXT_HOURS);

    series_response(&state, window, terminal_id, filters).await
}

/// GET /forecast/range
///
/// Hourly series for one terminal over `[start_iso, end_iso)`.
pub async fn range(
    State(state): State<AppState>,
    Query(params): Query<ForecastQuery>,
) -> Result<Json<WithMeta<ForecastResponse>>> {
    let (terminal_id, filters) = params.filters()?;
    let window = state
        .range_windows
        .resolve(params.start_iso.as_deref(), params.end_iso.as_deref())?;

    series_response(&state, window, terminal_id, filters).await
}

async fn series_response(
    state: &AppState,
    window: TimeWindow,
    terminal_id: String,
    filters: FilterSet,
) -> Result<Json<WithMeta<ForecastResponse>>> {
    let rows = state
        .planner
        .run(window, filters.clone(), GroupBy::DATE_HOUR)
        .await?;
    let series = forecast_series(&window, &rows, &terminal_id, &filters);

    let generated_at = to_fixed(state.range_windows.now());
    let tz = state.settings.timezone;
    let updated_at = series
        .latest_update
        .map_or(generated_at, |ts| to_fixed(ts.with_timezone(&tz)));
    let capacity_per_hour = state.capacity_for(&terminal_id).await;

    debug!(
        terminal_id = %terminal_id,
        hours = series.points.len(),
        "Forecast series built"
    );

    Ok(Json(state.meta.attach(ForecastResponse {
        horizon_hours: series.points,
        generated_at,
        updated_at,
        capacity_per_hour,
    })))
}
