use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
    pub settlement: SettlementRules,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementRules {
    /// ISO 4217 code stored on every order; amounts are in its minor unit
    pub currency: String,
    pub payment_timeout_ms: u64,
    /// PENDING orders older than this are failed by the sweeper
    pub pending_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub max_passengers_per_item: u32,
}

impl SettlementRules {
    pub fn payment_timeout(&self) -> Duration {
        Duration::from_millis(self.payment_timeout_ms)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.currency.len() != 3 {
            return Err(config::ConfigError::Message(format!(
                "settlement.currency must be a 3-letter code, got {:?}",
                self.currency
            )));
        }
        if self.payment_timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "settlement.payment_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.pending_ttl() <= self.payment_timeout() {
            return Err(config::ConfigError::Message(format!(
                "settlement.pending_ttl_seconds ({}s) must exceed the payment timeout ({}ms)",
                self.pending_ttl_seconds, self.payment_timeout_ms
            )));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(config::ConfigError::Message(
                "settlement.sweep_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.max_passengers_per_item == 0 {
            return Err(config::ConfigError::Message(
                "settlement.max_passengers_per_item must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    /// Only "mock" ships with this service
    pub provider: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. SKYFARE__DATABASE__URL
            .add_source(config::Environment::with_prefix("SKYFARE").separator("__"))
            .build()?;

        let config: Config = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(config::ConfigError::Message("auth.jwt_secret must be set".into()));
        }
        if self.rate_limit.requests <= 0 || self.rate_limit.window_seconds <= 0 {
            return Err(config::ConfigError::Message(
                "rate_limit.requests and rate_limit.window_seconds must be positive".into(),
            ));
        }
        self.settlement.validate()
    }
}
