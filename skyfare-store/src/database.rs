use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::SettlementRules;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    rule_key: String,
    rule_value: Value,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
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

    /// Overlay `business_rules` rows onto the configured settlement rules.
    pub async fn fetch_settlement_rules(
        &self,
        defaults: SettlementRules,
    ) -> Result<SettlementRules, sqlx::Error> {
        let rows: Vec<RuleRow> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .fold(defaults, |rules, row| apply_rule(rules, &row.rule_key, &row.rule_value)))
    }
}

/// Expected format: {"value": <number/string>}. Unknown keys and mistyped values are ignored.
fn apply_rule(mut rules: SettlementRules, key: &str, raw: &Value) -> SettlementRules {
    let Some(v) = raw.get("value") else {
        warn!("Business rule {} has no \"value\" field, ignoring", key);
        return rules;
    };

    match key {
        "currency" => {
            if let Some(s) = v.as_str() {
                rules.currency = s.to_string();
            }
        }
        "payment_timeout_ms" => {
            if let Some(u) = v.as_u64() {
                rules.payment_timeout_ms = u;
            }
        }
        "pending_ttl_seconds" => {
            if let Some(u) = v.as_u64() {
                rules.pending_ttl_seconds = u;
            }
        }
        "sweep_interval_seconds" => {
            if let Some(u) = v.as_u64() {
                rules.sweep_interval_seconds = u;
            }
        }
        "max_passengers_per_item" => {
            if let Some(u) = v.as_u64().and_then(|u| u32::try_from(u).ok()) {
                rules.max_passengers_per_item = u;
            }
        }
        _ => {}
    }
    rules
}
