use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::PaymentMethod;

pub type PaymentError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub order_id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationOutcome {
    Approved { authorization_ref: String },
    Declined { reason: String },
}

/// External card authorization provider.
#[async_trait]
pub trait PaymentAuthorizer: Send + Sync {
    /// Authorize and capture `amount` against the stored card
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, PaymentError>;

    /// Reverse a previous approval that could not be settled
    async fn void(&self, authorization_ref: &str) -> Result<(), PaymentError>;
}
