use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

use crate::state::AppState;

pub struct SettlementMetrics {
    registry: Registry,
    settlements_total: IntCounterVec,
    settlement_seconds: Histogram,
}

impl SettlementMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let settlements_total = IntCounterVec::new(
            Opts::new("skyfare_settlements_total", "Settlement attempts by outcome"),
            &["outcome"],
        )?;
        let settlement_seconds = Histogram::with_opts(HistogramOpts::new(
            "skyfare_settlement_seconds",
            "Wall time of a settlement attempt in seconds",
        ))?;

        registry.register(Box::new(settlements_total.clone()))?;
        registry.register(Box::new(settlement_seconds.clone()))?;

        Ok(Self {
            registry,
            settlements_total,
            settlement_seconds,
        })
    }

    /// `outcome` is "success" or an error kind.
    pub fn record(&self, outcome: &str, elapsed_seconds: f64) {
        self.settlements_total.with_label_values(&[outcome]).inc();
        self.settlement_seconds.observe(elapsed_seconds);
    }

    pub fn settlements(&self, outcome: &str) -> u64 {
        self.settlements_total.with_label_values(&[outcome]).get()
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_counted() {
        let metrics = SettlementMetrics::new().unwrap();
        metrics.record("success", 0.2);
        metrics.record("success", 0.1);
        metrics.record("PaymentDeclined", 0.3);

        assert_eq!(metrics.settlements("success"), 2);
        assert_eq!(metrics.settlements("PaymentDeclined"), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("skyfare_settlements_total{outcome=\"success\"} 2"));
        assert!(text.contains("skyfare_settlement_seconds_count 3"));
    }
}
