use skyfare_core::repository::OrderReader;
use skyfare_order::SettlementService;
use skyfare_store::app_config::RateLimitConfig;
use skyfare_store::RedisClient;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::SettlementMetrics;
use crate::middleware::resiliency::CircuitBreaker;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct RateLimiter {
    pub redis: Arc<RedisClient>,
    pub config: RateLimitConfig,
}

#[derive(Clone)]
pub struct AppState {
    pub settlement: Arc<dyn SettlementService>,
    pub orders: Arc<dyn OrderReader>,
    pub auth: AuthConfig,
    pub checkout_breaker: Arc<CircuitBreaker>,
    pub metrics: Arc<SettlementMetrics>,
    /// `None` disables rate limiting
    pub rate_limiter: Option<RateLimiter>,
}

impl AppState {
    pub fn new(
        settlement: Arc<dyn SettlementService>,
        orders: Arc<dyn OrderReader>,
        auth: AuthConfig,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            settlement,
            orders,
            auth,
            checkout_breaker: Arc::new(CircuitBreaker::new("checkout", 5, Duration::from_secs(30))),
            metrics: Arc::new(SettlementMetrics::new()?),
            rate_limiter: None,
        })
    }

    pub fn with_rate_limiter(mut self, redis: Arc<RedisClient>, config: RateLimitConfig) -> Self {
        self.rate_limiter = Some(RateLimiter { redis, config });
        self
    }

    pub fn with_checkout_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.checkout_breaker = Arc::new(breaker);
        self
    }
}
