use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

use parkr_core::StoreError;

use crate::app_config::BusinessRules;

pub(crate) fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
        e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => StoreError::Serialization(e.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlay rules stored in `business_rules` (`{"value": n}` rows) on top of `defaults`.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<(String, Value)> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        Ok(apply_rule_overrides(defaults, rows))
    }
}

fn apply_rule_overrides(mut rules: BusinessRules, rows: Vec<(String, Value)>) -> BusinessRules {
    for (key, value) in rows {
        let Some(n) = value.get("value").and_then(Value::as_u64) else {
            warn!("Ignoring business rule {} with non-numeric value", key);
            continue;
        };

        let as_u32 = || u32::try_from(n).ok();
        match key.as_str() {
            "max_advance_days" => rules.max_advance_days = as_u32().unwrap_or(rules.max_advance_days),
            "min_duration_hours" => rules.min_duration_hours = as_u32().unwrap_or(rules.min_duration_hours),
            "max_duration_hours" => rules.max_duration_hours = as_u32().unwrap_or(rules.max_duration_hours),
            "poll_interval_seconds" => rules.poll_interval_seconds = n,
            "activation_interval_seconds" => rules.activation_interval_seconds = n,
            _ => {}
        }
    }
    rules
}
