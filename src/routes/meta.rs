//! Table freshness and filter enumerations

use axum::{extract::State, Json};
use chrono::{DateTime, Days, FixedOffset};
use serde::Serialize;

use crate::error::Result;
use crate::meta::WithMeta;
use crate::state::AppState;
use crate::window::to_fixed;

pub const MOVE_TYPE_OPTIONS: [&str; 3] = ["ALL", "IN", "OUT"];
pub const DESIG_OPTIONS: [&str; 4] = ["ALL", "EMPTY", "FULL", "EXP"];

#[derive(Debug, Serialize)]
pub struct FreshnessResponse {
    /// Latest forecast run, or server time when nothing recent is stored
    pub updated_at: DateTime<FixedOffset>,
    pub row_count_last_24h: i64,
}

/// GET /meta/freshness
///
/// Counts rows bucketed from yesterday (local) onwards.
pub async fn freshness(State(state): State<AppState>) -> Result<Json<WithMeta<FreshnessResponse>>> {
    let tz = state.settings.timezone;
    let now = state.analytics_windows.now();
    let today = now.date_naive();
    let since = today.checked_sub_days(Days::new(1)).unwrap_or(today);

    let fresh = state.store.freshness(since).await.inspect_err(|_| {
        state.metrics.inc_store_errors();
    })?;

    Ok(Json(state.meta.attach(FreshnessResponse {
        updated_at: fresh
            .latest_update
            .map_or(to_fixed(now), |ts| to_fixed(ts.with_timezone(&tz))),
        row_count_last_24h: fresh.recent_rows,
    })))
}

#[derive(Debug, Serialize)]
pub struct EnumsResponse {
    pub terminals: Vec<String>,
    pub move_types: [&'static str; 3],
    pub desigs: [&'static str; 4],
}

/// GET /meta/enums
pub async fn enums(State(state): State<AppState>) -> Result<Json<WithMeta<EnumsResponse>>> {
    let terminals = state.store.terminals().await.inspect_err(|_| {
        state.metrics.inc_store_errors();
    })?;

    Ok(Json(state.meta.attach(EnumsResponse {
        terminals,
        move_types: MOVE_TYPE_OPTIONS,
        desigs: DESIG_OPTIONS,
    })))
}
