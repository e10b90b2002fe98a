use async_trait::async_trait;

use crate::StoreError;

/// Outbound domain events (Kafka in production).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), StoreError>;
}

/// Used when no broker is configured.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, topic: &str, key: &str, _payload: &str) -> Result<(), StoreError> {
        tracing::debug!("Event publishing disabled, dropping {}/{}", topic, key);
        Ok(())
    }
}
