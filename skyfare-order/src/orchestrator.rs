use skyfare_core::payment::{AuthorizationOutcome, AuthorizationRequest, PaymentAuthorizer, PaymentError};
use skyfare_core::{SettlementError, SettlementResult};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Wraps the configured authorizer and bounds every call in time.
pub struct PaymentOrchestrator {
    adapter: Arc<dyn PaymentAuthorizer>,
}

impl PaymentOrchestrator {
    pub fn new(adapter: Arc<dyn PaymentAuthorizer>) -> Self {
        Self { adapter }
    }

    /// Authorize the order total. Provider errors and timeouts come back as
    /// `PaymentUnavailable` / `PaymentTimeout`; a decline is a regular outcome.
    pub async fn authorize_within(
        &self,
        request: &AuthorizationRequest,
        timeout: Duration,
    ) -> SettlementResult<AuthorizationOutcome> {
        match tokio::time::timeout(timeout, self.adapter.authorize(request)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                tracing::error!("Payment authorization failed for order {}: {}", request.order_id, e);
                Err(SettlementError::PaymentUnavailable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    "Payment authorization for order {} did not answer within {:?}",
                    request.order_id,
                    timeout
                );
                Err(SettlementError::PaymentTimeout(timeout))
            }
        }
    }

    /// Best-effort reversal of an approval we could not persist.
    pub async fn void(&self, authorization_ref: &str) {
        if let Err(e) = self.adapter.void(authorization_ref).await {
            tracing::error!("Failed to void authorization {}: {}", authorization_ref, e);
        }
    }
}

/// Stand-in gateway for local runs. Card tokens drive the outcome:
/// `tok_decline` is declined, `tok_fail` errors, anything else is approved.
pub struct MockPaymentAuthorizer;

#[async_trait::async_trait]
impl PaymentAuthorizer for MockPaymentAuthorizer {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, PaymentError> {
        match request.payment_method.token.expose().as_str() {
            "tok_fail" => Err("Simulated payment gateway failure".into()),
            "tok_decline" => Ok(AuthorizationOutcome::Declined {
                reason: "Card declined by issuer".to_string(),
            }),
            _ => Ok(AuthorizationOutcome::Approved {
                authorization_ref: format!("mock_auth_{}_{}", request.order_id, Uuid::new_v4().simple()),
            }),
        }
    }

    async fn void(&self, authorization_ref: &str) -> Result<(), PaymentError> {
        tracing::info!("Mock gateway voided {}", authorization_ref);
        Ok(())
    }
}
