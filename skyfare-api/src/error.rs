use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use skyfare_core::{ErrorKind, SettlementError};

/// Successful responses: `{ "ok": true, "value": ... }`
pub struct Envelope<T>(pub T);

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(json!({
            "ok": true,
            "value": self.0,
        }))
        .into_response()
    }
}

/// Failed responses: `{ "ok": false, "errorKind": ..., "message": ... }`
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::NotFound(_) => "NotFound",
            AppError::Validation(_) => ErrorKind::ValidationError.as_str(),
            AppError::ServiceUnavailable(_) => "ServiceUnavailable",
            AppError::Settlement(e) => e.kind().as_str(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Settlement(e) => match e.kind() {
                ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
                ErrorKind::InvalidPaymentMethod => StatusCode::UNAUTHORIZED,
                ErrorKind::PaymentDeclined => StatusCode::PAYMENT_REQUIRED,
                ErrorKind::InsufficientInventory | ErrorKind::DuplicateRequest => StatusCode::CONFLICT,
                ErrorKind::StorageFailure => StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::PaymentUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::PaymentTimeout => StatusCode::GATEWAY_TIMEOUT,
            },
        }
    }

    /// Storage details stay in the logs; clients only see the correlation id.
    fn public_message(&self) -> String {
        match self {
            AppError::Settlement(SettlementError::Storage { correlation_id, .. }) => {
                format!(
                    "The order could not be stored. Reference: {}",
                    correlation_id
                )
            }
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Settlement(SettlementError::Storage { correlation_id, source }) = &self {
            tracing::error!(%correlation_id, "Storage failure during settlement: {}", source);
        }

        let status = self.status();
        let body = Json(json!({
            "ok": false,
            "errorKind": self.kind(),
            "message": self.public_message(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfare_core::InventoryResource;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_settlement_errors_map_to_status_codes() {
        let cases = vec![
            (SettlementError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (SettlementError::InvalidPaymentMethod("card".into()), StatusCode::UNAUTHORIZED),
            (SettlementError::PaymentDeclined("no".into()), StatusCode::PAYMENT_REQUIRED),
            (
                SettlementError::InsufficientInventory {
                    resource: InventoryResource::Seat,
                    id: 55,
                    requested: 1,
                },
                StatusCode::CONFLICT,
            ),
            (SettlementError::DuplicateRequest("k".into()), StatusCode::CONFLICT),
            (SettlementError::storage(Uuid::new_v4(), "boom"), StatusCode::INTERNAL_SERVER_ERROR),
            (SettlementError::PaymentUnavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (SettlementError::PaymentTimeout(Duration::from_secs(10)), StatusCode::GATEWAY_TIMEOUT),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Unauthorized("x".into()).kind(), "Unauthorized");
    }

    #[test]
    fn test_storage_message_hides_source() {
        let correlation_id = Uuid::new_v4();
        let err = AppError::from(SettlementError::storage(correlation_id, "relation \"tickets\" does not exist"));

        let message = err.public_message();
        assert!(message.contains(&correlation_id.to_string()));
        assert!(!message.contains("tickets"));
    }

    #[tokio::test]
    async fn test_storage_response_carries_only_the_reference() {
        let correlation_id = Uuid::new_v4();
        let response =
            AppError::from(SettlementError::storage(correlation_id, "deadlock detected")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["errorKind"], "StorageFailure");
        let message = body["message"].as_str().unwrap();
        assert!(message.contains(&correlation_id.to_string()));
        assert!(!message.contains("deadlock"));
    }
}
