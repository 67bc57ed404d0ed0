//! Database access layer with SQLx over a Postgres-compatible analytical store

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

use crate::normalize::{Desig, MoveType};
use crate::planner::{AggregateRow, AggregationPlan, GroupBy};
use crate::store::{ForecastStore, Freshness, StoreError};

/// Bucket instant built from the stored date and hour columns
const BUCKET_TS: &str = r#"CAST("MoveDate_pred" AS TIMESTAMP) + "MoveHour_pred" * INTERVAL '1 hour'"#;

/// Forecast table behind a connection pool
#[derive(Clone)]
pub struct PgForecastStore {
    pool: PgPool,
    table: String,
}

impl PgForecastStore {
    /// Create a new database connection pool
    pub async fn connect(
        connection_string: &str,
        max_connections: u32,
        table: &str,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(connection_string)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {}", e)))?;

        info!(table = table, "Database connection pool established");
        Ok(Self::from_pool(pool, table))
    }

    /// `table` must already have passed [`is_valid_table_name`].
    pub fn from_pool(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Accepts `table` or `schema.table` made of ASCII letters, digits and
/// underscores. The name is interpolated into SQL, so nothing else passes.
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// `CASE` expression mapping a raw column onto its canonical labels.
/// Strips the same whitespace set as [`crate::normalize::TRIMMED`].
fn normalize_case<T: Copy>(column: &str, aliases: &[(&str, T)], label: fn(&T) -> &'static str) -> String {
    let mut sql = format!(r"CASE UPPER(BTRIM(COALESCE({column}, ''), E' \t\r\n'))");
    for (alias, value) in aliases {
        sql.push_str(&format!(" WHEN '{}' THEN '{}'", alias, label(value)));
    }
    sql.push_str(" ELSE 'UNK' END");
    sql
}

fn group_columns(group_by: GroupBy) -> Vec<&'static str> {
    let mut columns = Vec::new();
    if group_by.terminal {
        columns.push("terminal_id");
    }
    if group_by.date_hour {
        columns.push("move_date");
    }
    if group_by.date_hour || group_by.hour {
        columns.push("move_hour");
    }
    if group_by.move_type {
        columns.push("move_type");
    }
    if group_by.desig {
        columns.push("desig");
    }
    columns
}

/// Renders the deduplicating aggregation for a plan.
///
/// `base` normalizes categories and restricts to the window, `latest` ranks
/// runs within each cell, and the outer select sums rank-1 rows only.
pub fn build_aggregate_query<'a>(table: &str, plan: &'a AggregationPlan) -> QueryBuilder<'a, Postgres> {
    let (start, end) = plan.window.naive_bounds();
    let move_type_case = normalize_case(r#""MoveType""#, MoveType::ALIASES, MoveType::as_str);
    let desig_case = normalize_case(r#""Desig""#, Desig::ALIASES, Desig::as_str);

    let mut qb = QueryBuilder::new(format!(
        r#"
        WITH base AS (
            SELECT
                "TerminalID" AS terminal_id,
                {move_type_case} AS move_type,
                {desig_case} AS desig,
                "MoveDate_pred" AS move_date,
                "MoveHour_pred" AS move_hour,
                CAST("TokenCount_pred" AS DOUBLE PRECISION) AS pred,
                CAST("TokenCount_true" AS DOUBLE PRECISION) AS actual,
                updated_at
            FROM {table}
            WHERE {BUCKET_TS} >= "#
    ));
    qb.push_bind(start);
    qb.push(format!(" AND {BUCKET_TS} < "));
    qb.push_bind(end);
    qb.push(
        r#"
        ),
        latest AS (
            SELECT
                base.*,
                ROW_NUMBER() OVER (
                    PARTITION BY terminal_id, move_type, desig, move_date, move_hour
                    ORDER BY updated_at DESC NULLS LAST, pred DESC NULLS LAST
                ) AS rn
            FROM base
            WHERE TRUE"#,
    );

    if let Some(terminal) = &plan.filters.terminal_id {
        qb.push(" AND terminal_id = ").push_bind(terminal.as_str());
    }
    if let Some(move_type) = plan.filters.move_type {
        qb.push(" AND move_type = ").push_bind(move_type.as_str());
    }
    if let Some(desig) = plan.filters.desig {
        qb.push(" AND desig = ").push_bind(desig.as_str());
    }

    let columns = group_columns(plan.group_by);
    qb.push("\n        )\n        SELECT ");
    for column in &columns {
        qb.push(*column).push(", ");
    }
    qb.push(
        r#"
            SUM(GREATEST(pred, 0)) AS total,
            SUM(actual) AS actual,
            MAX(updated_at) AS latest_update,
            SUM(CASE WHEN pred < 0 THEN 1 ELSE 0 END) AS clamped,
            SUM(CASE WHEN move_type = 'UNK' OR desig = 'UNK' THEN 1 ELSE 0 END) AS unknown
        FROM latest
        WHERE rn = 1"#,
    );
    if columns.is_empty() {
        qb.push("\n        HAVING COUNT(*) > 0");
    } else {
        qb.push(format!("\n        GROUP BY {}", columns.join(", ")));
    }

    qb
}

fn decode_row(row: &PgRow, group_by: GroupBy) -> Result<AggregateRow, sqlx::Error> {
    let terminal_id = if group_by.terminal {
        Some(row.try_get::<String, _>("terminal_id")?)
    } else {
        None
    };
    let date = if group_by.date_hour {
        Some(row.try_get::<NaiveDate, _>("move_date")?)
    } else {
        None
    };
    let hour = if group_by.date_hour || group_by.hour {
        Some(row.try_get::<i32, _>("move_hour")?.clamp(0, 23) as u32)
    } else {
        None
    };
    let move_type = if group_by.move_type {
        Some(MoveType::normalize(row.try_get::<&str, _>("move_type")?))
    } else {
        None
    };
    let desig = if group_by.desig {
        Some(Desig::normalize(row.try_get::<&str, _>("desig")?))
    } else {
        None
    };

    Ok(AggregateRow {
        terminal_id,
        date,
        hour,
        move_type,
        desig,
        total: row.try_get::<Option<f64>, _>("total")?.unwrap_or(0.0),
        actual: row.try_get("actual")?,
        latest_update: row.try_get("latest_update")?,
        clamped: row.try_get::<Option<i64>, _>("clamped")?.unwrap_or(0),
        unknown: row.try_get::<Option<i64>, _>("unknown")?.unwrap_or(0),
    })
}

#[async_trait]
impl ForecastStore for PgForecastStore {
    async fn aggregate(&self, plan: &AggregationPlan) -> Result<Vec<AggregateRow>, StoreError> {
        let mut qb = build_aggregate_query(&self.table, plan);
        debug!(sql = qb.sql(), "Running deduplicated aggregation");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let aggregated = rows
            .iter()
            .map(|row| decode_row(row, plan.group_by))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(aggregated)
    }

    async fn freshness(&self, since: NaiveDate) -> Result<Freshness, StoreError> {
        let query = format!(
            r#"
            SELECT MAX(updated_at) AS latest_update, COUNT(*) AS recent_rows
            FROM {}
            WHERE "MoveDate_pred" >= $1
            "#,
            self.table
        );

        let row = sqlx::query(&query).bind(since).fetch_one(&self.pool).await?;

        Ok(Freshness {
            latest_update: row.try_get::<Option<DateTime<Utc>>, _>("latest_update")?,
            recent_rows: row.try_get("recent_rows")?,
        })
    }

    async fn terminals(&self) -> Result<Vec<String>, StoreError> {
        let query = format!(
            r#"SELECT DISTINCT "TerminalID" AS terminal_id FROM {} ORDER BY 1"#,
            self.table
        );

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let terminals = rows
            .iter()
            .map(|row| row.try_get::<String, _>("terminal_id"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(terminals)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
