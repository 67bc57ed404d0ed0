//! Dashboard analytics over an arbitrary window
//!
//! Every handler resolves the window and filters, runs one deduplicated
//! aggregation and shapes the rows.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::meta::WithMeta;
use crate::normalize::FilterSet;
use crate::planner::{AggregateRow, GroupBy};
use crate::shaper::{
    self, CompositionDim, CompositionRow, DesigPoint, HeatmapCell, HourlyTotal, MoveTypePoint,
    MoveTypeShare, RankingEntry, SunburstNode, TotalVolume,
};
use crate::state::AppState;
use crate::window::TimeWindow;

/// Query parameters for analytics endpoints
#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub start_iso: Option<String>,
    pub end_iso: Option<String>,
    pub terminal_id: Option<String>,
    pub move_type: Option<String>,
    pub desig: Option<String>,
    /// Composition dimension: `desig` or `movetype`
    pub dim: Option<String>,
}

/// Which filters an endpoint honours
#[derive(Debug, Clone, Copy)]
struct Accepts {
    terminal: bool,
    move_type: bool,
    desig: bool,
}

impl Accepts {
    const ALL: Accepts = Accepts {
        terminal: true,
        move_type: true,
        desig: true,
    };
    const CATEGORIES: Accepts = Accepts {
        terminal: false,
        move_type: true,
        desig: true,
    };
    const NO_MOVE_TYPE: Accepts = Accepts {
        terminal: true,
        move_type: false,
        desig: true,
    };
    const NO_DESIG: Accepts = Accepts {
        terminal: true,
        move_type: true,
        desig: false,
    };
}

fn pick(on: bool, value: &Option<String>) -> Option<&str> {
    if on {
        value.as_deref()
    } else {
        None
    }
}

impl AnalyticsQuery {
    fn filters(&self, accepts: Accepts) -> FilterSet {
        FilterSet::from_raw(
            pick(accepts.terminal, &self.terminal_id),
            pick(accepts.move_type, &self.move_type),
            pick(accepts.desig, &self.desig),
        )
    }
}

async fn aggregate(
    state: &AppState,
    params: &AnalyticsQuery,
    accepts: Accepts,
    group_by: GroupBy,
) -> Result<(TimeWindow, Vec<AggregateRow>)> {
    let window = state
        .analytics_windows
        .resolve(params.start_iso.as_deref(), params.end_iso.as_deref())?;
    let rows = state
        .planner
        .run(window, params.filters(accepts), group_by)
        .await?;
    Ok((window, rows))
}

#[derive(Debug, Serialize)]
pub struct RankingResponse {
    pub ranking: Vec<RankingEntry>,
}

/// GET /analytics/terminal_ranking
pub async fn terminal_ranking(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<WithMeta<RankingResponse>>> {
    let (_, rows) = aggregate(&state, &params, Accepts::CATEGORIES, GroupBy::TERMINAL).await?;
    Ok(Json(state.meta.attach(RankingResponse {
        ranking: shaper::ranking(&rows),
    })))
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub share: MoveTypeShare,
}

/// GET /analytics/movetype_share
pub async fn movetype_share(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<WithMeta<ShareResponse>>> {
    let (_, rows) = aggregate(&state, &params, Accepts::NO_MOVE_TYPE, GroupBy::MOVE_TYPE).await?;
    Ok(Json(state.meta.attach(ShareResponse {
        share: shaper::share(&rows),
    })))
}

#[derive(Debug, Serialize)]
pub struct PointsResponse<T> {
    pub points: Vec<T>,
}

/// GET /analytics/movetype_hourly
pub async fn movetype_hourly(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<WithMeta<PointsResponse<MoveTypePoint>>>> {
    let (_, rows) = aggregate(
        &state,
        &params,
        Accepts::NO_MOVE_TYPE,
        GroupBy::DATE_HOUR_MOVE_TYPE,
    )
    .await?;
    Ok(Json(state.meta.attach(PointsResponse {
        points: shaper::move_type_hourly(&rows),
    })))
}

/// GET /analytics/desig_hourly
pub async fn desig_hourly(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<WithMeta<PointsResponse<DesigPoint>>>> {
    let (_, rows) = aggregate(&state, &params, Accepts::NO_DESIG, GroupBy::DATE_HOUR_DESIG).await?;
    Ok(Json(state.meta.attach(PointsResponse {
        points: shaper::desig_hourly(&rows),
    })))
}

#[derive(Debug, Serialize)]
pub struct HeatmapResponse {
    pub cells: Vec<HeatmapCell>,
}

/// GET /analytics/terminal_hour_heatmap
pub async fn terminal_hour_heatmap(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<WithMeta<HeatmapResponse>>> {
    let (_, rows) = aggregate(&state, &params, Accepts::CATEGORIES, GroupBy::TERMINAL_HOUR).await?;
    Ok(Json(state.meta.attach(HeatmapResponse {
        cells: shaper::heatmap(&rows),
    })))
}

#[derive(Debug, Serialize)]
pub struct SunburstResponse {
    pub sunburst: Vec<SunburstNode>,
}

/// GET /analytics/sunburst
pub async fn sunburst(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<WithMeta<SunburstResponse>>> {
    let (_, rows) = aggregate(
        &state,
        &params,
        Accepts::ALL,
        GroupBy::TERMINAL_MOVE_TYPE_DESIG,
    )
    .await?;
    Ok(Json(state.meta.attach(SunburstResponse {
        sunburst: shaper::sunburst(&rows),
    })))
}

#[derive(Debug, Serialize)]
pub struct CompositionResponse {
    pub dim: CompositionDim,
    pub rows: Vec<CompositionRow>,
}

/// GET /analytics/composition_by_terminal
pub async fn composition_by_terminal(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<WithMeta<CompositionResponse>>> {
    let dim = CompositionDim::parse(params.dim.as_deref());
    let group_by = match dim {
        CompositionDim::Desig => GroupBy::TERMINAL_DESIG,
        CompositionDim::MoveType => GroupBy::TERMINAL_MOVE_TYPE,
    };
    let (_, rows) = aggregate(&state, &params, Accepts::ALL, group_by).await?;
    Ok(Json(state.meta.attach(CompositionResponse {
        dim,
        rows: shaper::composition(&rows, dim),
    })))
}

/// GET /analytics/hourly_totals
pub async fn hourly_totals(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<WithMeta<PointsResponse<HourlyTotal>>>> {
    let (window, rows) =
        aggregate(&state, &params, Accepts::ALL, GroupBy::DATE_HOUR_MOVE_TYPE).await?;
    Ok(Json(state.meta.attach(PointsResponse {
        points: shaper::hourly_totals(&window, &rows),
    })))
}

/// GET /analytics/total_forecast_volume
pub async fn total_forecast_volume(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<WithMeta<TotalVolume>>> {
    let (window, rows) =
        aggregate(&state, &params, Accepts::ALL, GroupBy::DATE_HOUR_MOVE_TYPE).await?;
    Ok(Json(state.meta.attach(shaper::total_volume(&window, &rows))))
}
