//! Per-terminal capacity read/write

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, Result};
use crate::meta::WithMeta;
use crate::normalize::normalize_terminal_filter;
use crate::state::AppState;
use crate::window::to_fixed;

#[derive(Debug, Deserialize)]
pub struct CapacityQuery {
    pub terminal_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CapacityUpdate {
    pub terminal_id: String,
    pub capacity_per_hour: u32,
}

#[derive(Debug, Serialize)]
pub struct CapacityResponse {
    pub terminal_id: String,
    pub capacity_per_hour: u32,
    pub updated_at: DateTime<FixedOffset>,
}

fn required_terminal(raw: Option<&str>) -> Result<String> {
    normalize_terminal_filter(raw).ok_or(AppError::MissingParameter("terminal_id"))
}

/// GET /capacity
///
/// Stored capacity, or the configured default for unknown terminals.
pub async fn get_capacity(
    State(state): State<AppState>,
    Query(params): Query<CapacityQuery>,
) -> Result<Json<WithMeta<CapacityResponse>>> {
    let terminal_id = required_terminal(params.terminal_id.as_deref())?;
    let tz = state.settings.timezone;

    let response = match state.capacity.get(&terminal_id).await {
        Some(entry) => CapacityResponse {
            terminal_id,
            capacity_per_hour: entry.capacity_per_hour,
            updated_at: to_fixed(entry.updated_at.with_timezone(&tz)),
        },
        None => CapacityResponse {
            terminal_id,
            capacity_per_hour: state.settings.default_capacity_per_hour,
            updated_at: to_fixed(state.range_windows.now()),
        },
    };

    Ok(Json(state.meta.attach(response)))
}

/// PUT /capacity
pub async fn put_capacity(
    State(state): State<AppState>,
    body: std::result::Result<Json<CapacityUpdate>, JsonRejection>,
) -> Result<Json<WithMeta<CapacityResponse>>> {
    let Json(update) = body?;
    let terminal_id = required_terminal(Some(update.terminal_id.as_str()))?;

    let entry = state
        .capacity
        .put(&terminal_id, update.capacity_per_hour)
        .await;
    info!(
        terminal_id = %entry.terminal_id,
        capacity_per_hour = entry.capacity_per_hour,
        "Capacity updated"
    );

    Ok(Json(state.meta.attach(CapacityResponse {
        terminal_id: entry.terminal_id,
        capacity_per_hour: entry.capacity_per_hour,
        updated_at: to_fixed(entry.updated_at.with_timezone(&state.settings.timezone)),
    })))
}
