pub mod events;
pub mod models;
pub mod payment;
pub mod repository;

use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Error type crossing the storage seam. Backends box their native errors.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Which stock pool ran out during reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryResource {
    Seat,
    Baggage,
}

impl fmt::Display for InventoryResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryResource::Seat => write!(f, "seat"),
            InventoryResource::Baggage => write!(f, "baggage type"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient inventory for {resource} {id}: requested {requested}")]
    InsufficientInventory {
        resource: InventoryResource,
        id: i64,
        requested: u32,
    },

    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Payment provider unavailable: {0}")]
    PaymentUnavailable(String),

    #[error("Payment authorization timed out after {0:?}")]
    PaymentTimeout(Duration),

    #[error("A settlement with idempotency key {0} is already in progress")]
    DuplicateRequest(String),

    #[error("Storage failure (correlation id {correlation_id}): {source}")]
    Storage {
        correlation_id: Uuid,
        #[source]
        source: StoreError,
    },
}

/// Stable, client-facing name of a failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationError,
    InsufficientInventory,
    InvalidPaymentMethod,
    PaymentDeclined,
    PaymentUnavailable,
    PaymentTimeout,
    DuplicateRequest,
    StorageFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::InsufficientInventory => "InsufficientInventory",
            ErrorKind::InvalidPaymentMethod => "InvalidPaymentMethod",
            ErrorKind::PaymentDeclined => "PaymentDeclined",
            ErrorKind::PaymentUnavailable => "PaymentUnavailable",
            ErrorKind::PaymentTimeout => "PaymentTimeout",
            ErrorKind::DuplicateRequest => "DuplicateRequest",
            ErrorKind::StorageFailure => "StorageFailure",
        }
    }
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::Validation(_) => ErrorKind::ValidationError,
            SettlementError::InsufficientInventory { .. } => ErrorKind::InsufficientInventory,
            SettlementError::InvalidPaymentMethod(_) => ErrorKind::InvalidPaymentMethod,
            SettlementError::PaymentDeclined(_) => ErrorKind::PaymentDeclined,
            SettlementError::PaymentUnavailable(_) => ErrorKind::PaymentUnavailable,
            SettlementError::PaymentTimeout(_) => ErrorKind::PaymentTimeout,
            SettlementError::DuplicateRequest(_) => ErrorKind::DuplicateRequest,
            SettlementError::Storage { .. } => ErrorKind::StorageFailure,
        }
    }

    pub fn storage(correlation_id: Uuid, source: impl Into<StoreError>) -> Self {
        SettlementError::Storage {
            correlation_id,
            source: source.into(),
        }
    }
}

pub type SettlementResult<T> = Result<T, SettlementError>;
