//! HTTP routes

pub mod analytics;
pub mod capacity;
pub mod forecast;
pub mod health;
pub mod meta;
pub mod metrics;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        // Health and metrics (Kubernetes probes + Prometheus)
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::prometheus_metrics))
        // Forecast series
        .route("/forecast/next8h", get(forecast::next_8h))
        .route("/forecast/range", get(forecast::range))
        // Dashboard analytics
        .route("/analytics/terminal_ranking", get(analytics::terminal_ranking))
        .route("/analytics/movetype_share", get(analytics::movetype_share))
        .route("/analytics/movetype_hourly", get(analytics::movetype_hourly))
        .route("/analytics/desig_hourly", get(analytics::desig_hourly))
        .route(
            "/analytics/terminal_hour_heatmap",
            get(analytics::terminal_hour_heatmap),
        )
        .route("/analytics/sunburst", get(analytics::sunburst))
        .route(
            "/analytics/composition_by_terminal",
            get(analytics::composition_by_terminal),
        )
        .route("/analytics/hourly_totals", get(analytics::hourly_totals))
        .route(
            "/analytics/total_forecast_volume",
            get(analytics::total_forecast_volume),
        )
        // Metadata
        .route("/meta/freshness", get(meta::freshness))
        .route("/meta/enums", get(meta::enums))
        // Capacity
        .route(
            "/capacity",
            get(capacity::get_capacity).put(capacity::put_capacity),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), count_requests))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn count_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.metrics.inc_requests();
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request as HttpRequest, StatusCode};
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::config::Settings;
    use crate::planner::{AggregateRow, AggregationPlan, ForecastRecord};
    use crate::store::{ForecastStore, Freshness, MemoryForecastStore, StoreError};

    const WINDOW: &str = "start_iso=2024-01-15T08:00&end_iso=2024-01-15T12:00";

    fn record(terminal: &str, mt: &str, dg: &str, hour: u32, pred: f64, run: u32) -> ForecastRecord {
        ForecastRecord {
            terminal_id: terminal.to_string(),
            move_type: mt.to_string(),
            desig: dg.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            hour,
            token_count_pred: pred,
            token_count_true: None,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 14, run, 0, 0).unwrap(),
        }
    }

    fn app() -> Router {
        let store = MemoryForecastStore::with_records(vec![
            record("T1", "IN", "FULL", 8, 100.0, 1),
            record("T1", "in", "F", 8, 130.0, 2),
            record("T1", "OUT", "EMPTY", 9, 40.0, 1),
            record("T2", "IN", "FULL", 8, 20.0, 1),
            record("T2", "OUT", "reefer", 10, -5.0, 1),
        ]);
        router(AppState::new(Settings::default(), Arc::new(store)))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        send(app, Method::GET, uri, None).await
    }

    fn preds(points: &Value) -> Vec<f64> {
        points
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["pred"].as_f64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let app = app();
        let (status, body) = get_json(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));

        let (status, body) = get_json(&app, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["store"]["backend"], "memory");
    }

    #[tokio::test]
    async fn test_range_series_dedups_and_gap_fills() {
        let app = app();
        let (status, body) =
            get_json(&app, &format!("/forecast/range?terminal_id=T1&{WINDOW}")).await;
        assert_eq!(status, StatusCode::OK);

        let hours = &body["horizon_hours"];
        assert_eq!(preds(hours), vec![130.0, 40.0, 0.0, 0.0]);
        assert_eq!(hours[0]["ts"], "2024-01-15T08:00:00+04:00");
        assert_eq!(hours[0]["move_type"], "ALL");
        assert_eq!(hours[0]["desig"], "ALL");
        assert_eq!(body["capacity_per_hour"], 60);
        assert_eq!(body["updated_at"], "2024-01-14T06:00:00+04:00");
        assert_eq!(body["meta"]["tz"], "Asia/Dubai");
        assert_eq!(body["meta"]["data_quality"]["negative_predictions"], "clamped_to_zero");
    }

    #[tokio::test]
    async fn test_range_series_labels_follow_filter() {
        let app = app();
        let (_, body) = get_json(
            &app,
            &format!("/forecast/range?terminal_id=T1&move_type=inbound&{WINDOW}"),
        )
        .await;
        let hours = &body["horizon_hours"];
        assert_eq!(preds(hours), vec![130.0, 0.0, 0.0, 0.0]);
        assert_eq!(hours[0]["move_type"], "IN");
    }

    #[tokio::test]
    async fn test_next8h_has_eight_hours() {
        let app = app();
        let (status, body) = get_json(&app, "/forecast/next8h?terminal_id=T1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["horizon_hours"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_forecast_requires_terminal() {
        let app = app();
        let (status, body) = get_json(&app, &format!("/forecast/range?{WINDOW}")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "terminal_id is required");

        let (status, _) = get_json(&app, "/forecast/next8h?terminal_id=ALL").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_window_errors_are_422() {
        let app = app();
        let (status, body) = get_json(
            &app,
            "/analytics/terminal_ranking?start_iso=2024-01-15T10:00&end_iso=2024-01-15T08:00",
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], 422);

        let (status, body) =
            get_json(&app, "/analytics/terminal_ranking?end_iso=2024-01-15T08:00").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("start_iso"));

        let (status, body) = get_json(
            &app,
            "/analytics/terminal_ranking?start_iso=yesterday&end_iso=2024-01-15T08:00",
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("start_iso"));
    }

    #[tokio::test]
    async fn test_window_span_limits() {
        let app = app();
        let (status, _) = get_json(
            &app,
            "/forecast/range?terminal_id=T1&start_iso=2024-01-01&end_iso=2024-01-15",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = get_json(
            &app,
            "/forecast/range?terminal_id=T1&start_iso=2024-01-01&end_iso=2024-01-16",
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = get_json(
            &app,
            "/analytics/hourly_totals?start_iso=2024-01-01&end_iso=2024-05-01",
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_ranking_all_equivalent_to_omitted() {
        let app = app();
        let (_, plain) = get_json(&app, &format!("/analytics/terminal_ranking?{WINDOW}")).await;
        let (_, all) = get_json(
            &app,
            &format!("/analytics/terminal_ranking?move_type=ALL&desig=all&{WINDOW}"),
        )
        .await;
        assert_eq!(plain["ranking"], all["ranking"]);
        assert_eq!(
            plain["ranking"],
            json!([
                {"terminal": "T1", "total_pred": 170.0},
                {"terminal": "T2", "total_pred": 20.0},
            ])
        );
    }

    #[tokio::test]
    async fn test_unknown_filter_matches_unk_bucket() {
        let app = app();
        let (_, body) = get_json(
            &app,
            &format!("/analytics/terminal_ranking?desig=reefer&{WINDOW}"),
        )
        .await;
        assert_eq!(body["ranking"], json!([{"terminal": "T2", "total_pred": 0.0}]));
    }

    #[tokio::test]
    async fn test_share_and_hourly() {
        let app = app();
        let (_, body) = get_json(&app, &format!("/analytics/movetype_share?{WINDOW}")).await;
        assert_eq!(body["share"], json!({"IN": 150.0, "OUT": 40.0}));

        let (_, body) = get_json(
            &app,
            &format!("/analytics/desig_hourly?terminal_id=T1&{WINDOW}"),
        )
        .await;
        assert_eq!(
            body["points"],
            json!([
                {"date": "2024-01-15", "hour": 8, "desig": "FULL", "pred": 130.0},
                {"date": "2024-01-15", "hour": 9, "desig": "EMPTY", "pred": 40.0},
            ])
        );
    }

    #[tokio::test]
    async fn test_sunburst_and_composition() {
        let app = app();
        let (_, body) = get_json(&app, &format!("/analytics/sunburst?{WINDOW}")).await;
        let t1 = &body["sunburst"][0];
        assert_eq!(t1["name"], "T1");
        assert_eq!(t1["value"], 170.0);
        assert_eq!(t1["children"][0]["name"], "IN");
        assert_eq!(t1["children"][0]["children"][0]["name"], "FULL");

        let (_, body) = get_json(
            &app,
            &format!("/analytics/composition_by_terminal?dim=movetype&terminal_id=T1&{WINDOW}"),
        )
        .await;
        assert_eq!(body["dim"], "movetype");
        assert_eq!(
            body["rows"],
            json!([
                {"terminal": "T1", "key": "IN", "pred": 130.0},
                {"terminal": "T1", "key": "OUT", "pred": 40.0},
            ])
        );
    }

    #[tokio::test]
    async fn test_total_volume_and_hourly_totals_agree() {
        let app = app();
        let (_, kpi) = get_json(&app, &format!("/analytics/total_forecast_volume?{WINDOW}")).await;
        assert_eq!(kpi["total_in"], 150.0);
        assert_eq!(kpi["total_out"], 40.0);
        assert_eq!(kpi["total_volume"], 190.0);
        assert_eq!(kpi["net_flow"], 110.0);
        assert_eq!(kpi["window_hours"], 4);
        assert_eq!(kpi["breakdown"].as_array().unwrap().len(), 4);

        let (_, totals) = get_json(&app, &format!("/analytics/hourly_totals?{WINDOW}")).await;
        assert_eq!(preds(&totals["points"]), vec![150.0, 40.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_heatmap_cells() {
        let app = app();
        let (_, body) = get_json(
            &app,
            &format!("/analytics/terminal_hour_heatmap?move_type=OUT&{WINDOW}"),
        )
        .await;
        assert_eq!(
            body["cells"],
            json!([
                {"terminal": "T1", "hour": 9, "pred": 40.0},
                {"terminal": "T2", "hour": 10, "pred": 0.0},
            ])
        );
    }

    #[tokio::test]
    async fn test_meta_endpoints() {
        let app = app();
        let (status, body) = get_json(&app, "/meta/enums").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["terminals"], json!(["T1", "T2"]));
        assert_eq!(body["move_types"], json!(["ALL", "IN", "OUT"]));
        assert_eq!(body["desigs"], json!(["ALL", "EMPTY", "FULL", "EXP"]));

        let (status, body) = get_json(&app, "/meta/freshness").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row_count_last_24h"], 0);
        assert!(body["updated_at"].is_string());
    }

    #[tokio::test]
    async fn test_capacity_put_then_get() {
        let app = app();
        let (status, body) = get_json(&app, "/capacity?terminal_id=T1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["capacity_per_hour"], 60);

        let (status, body) = send(
            &app,
            Method::PUT,
            "/capacity",
            Some(json!({"terminal_id": "T1", "capacity_per_hour": 80})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["capacity_per_hour"], 80);

        let (_, body) = get_json(&app, "/capacity?terminal_id=T1").await;
        assert_eq!(body["capacity_per_hour"], 80);

        let (_, body) =
            get_json(&app, &format!("/forecast/range?terminal_id=T1&{WINDOW}")).await;
        assert_eq!(body["capacity_per_hour"], 80);
    }

    #[tokio::test]
    async fn test_capacity_rejects_bad_body() {
        let app = app();
        let (status, _) = send(
            &app,
            Method::PUT,
            "/capacity",
            Some(json!({"terminal_id": "T1", "capacity_per_hour": -3})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = get_json(&app, "/capacity").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    struct UnreachableStore;

    #[async_trait]
    impl ForecastStore for UnreachableStore {
        async fn aggregate(&self, _: &AggregationPlan) -> Result<Vec<AggregateRow>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn freshness(&self, _: NaiveDate) -> Result<Freshness, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn terminals(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn backend(&self) -> &'static str {
            "unreachable"
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_503() {
        let app = router(AppState::new(Settings::default(), Arc::new(UnreachableStore)));

        let (status, body) = get_json(&app, &format!("/analytics/movetype_share?{WINDOW}")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], 503);

        let (status, _) = get_json(&app, "/meta/enums").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = get_json(&app, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
    }

    #[tokio::test]
    async fn test_metrics_counts_requests() {
        let app = app();
        get_json(&app, "/health").await;
        get_json(&app, &format!("/analytics/terminal_ranking?{WINDOW}")).await;

        let response = app
            .clone()
            .oneshot(HttpRequest::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("gate_forecast_requests_total 3\n"));
        assert!(text.contains("gate_forecast_clamped_predictions_total 1\n"));
    }
}
