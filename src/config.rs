//! Process settings loaded from the environment

use anyhow::{bail, Context};
use chrono_tz::Tz;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::db::is_valid_table_name;

/// Log line format for the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    /// Unset runs against an empty in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub tokens_table: String,
    pub timezone: Tz,
    pub default_capacity_per_hour: u32,
    pub range_max_days: i64,
    pub analytics_max_days: i64,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            database_url: None,
            db_max_connections: 10,
            tokens_table: "gate_tokens".to_string(),
            timezone: chrono_tz::Asia::Dubai,
            default_capacity_per_hour: 60,
            range_max_days: 14,
            analytics_max_days: 93,
            log_format: LogFormat::Text,
        }
    }
}

impl Settings {
    /// Reads settings after loading an optional `.env` file.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let tokens_table = get("TOKENS_TABLE").unwrap_or(defaults.tokens_table);
        if !is_valid_table_name(&tokens_table) {
            bail!("TOKENS_TABLE is not a valid table name: {tokens_table}");
        }

        let timezone = match get("DEFAULT_TIMEZONE") {
            Some(name) => Tz::from_str(&name)
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("Invalid DEFAULT_TIMEZONE: {name}"))?,
            None => defaults.timezone,
        };

        let log_format = match get("LOG_FORMAT").map(|v| v.to_lowercase()).as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("Invalid LOG_FORMAT: {other} (expected text or json)"),
        };

        let range_max_days = parse_or(&get, "RANGE_MAX_DAYS", defaults.range_max_days)?;
        let analytics_max_days = parse_or(&get, "ANALYTICS_MAX_DAYS", defaults.analytics_max_days)?;
        if range_max_days <= 0 || analytics_max_days <= 0 {
            bail!("RANGE_MAX_DAYS and ANALYTICS_MAX_DAYS must be positive");
        }

        Ok(Self {
            listen_addr: parse_or(&get, "LISTEN_ADDR", defaults.listen_addr)?,
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            tokens_table,
            timezone,
            default_capacity_per_hour: parse_or(
                &get,
                "DEFAULT_CAPACITY_PER_HOUR",
                defaults.default_capacity_per_hour,
            )?,
            range_max_days,
            analytics_max_days,
            log_format,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {key}: {raw}")),
        None => Ok(default),
    }
}
