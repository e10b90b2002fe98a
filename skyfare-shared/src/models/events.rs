use uuid::Uuid;

pub const ORDER_PAID_TOPIC: &str = "order.paid";
pub const ORDER_FAILED_TOPIC: &str = "order.failed";

/// Emitted once a settlement commits its tickets and payment.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderPaidEvent {
    pub order_id: i64,
    pub user_id: i64,
    pub total: i64,
    pub currency: String,
    pub ticket_count: usize,
    pub has_shipment: bool,
    pub correlation_id: Uuid,
    pub timestamp: i64,
}

/// Emitted when a reserved order is compensated (declined, timed out, storage failure).
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderFailedEvent {
    pub order_id: i64,
    pub user_id: i64,
    pub reason: String,
    pub correlation_id: Option<Uuid>,
    pub timestamp: i64,
}
