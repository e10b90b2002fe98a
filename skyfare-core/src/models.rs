use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyfare_shared::Masked;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Statuses
// ============================================================================

/// Order status in the settlement lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Transitions allowed at creation time: PENDING → PAID and PENDING → FAILED.
    /// PAID is immutable here; cancellation is driven elsewhere.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid) | (OrderStatus::Pending, OrderStatus::Failed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "FAILED" => Ok(OrderStatus::Failed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Issued,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Issued => "ISSUED",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ISSUED" => Ok(TicketStatus::Issued),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Approved,
    Declined,
    Pending,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Declined => "DECLINED",
            PaymentStatus::Pending => "PENDING",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APPROVED" => Ok(PaymentStatus::Approved),
            "DECLINED" => Ok(PaymentStatus::Declined),
            "PENDING" => Ok(PaymentStatus::Pending),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Requested,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Requested => "REQUESTED",
        }
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUESTED" => Ok(ShipmentStatus::Requested),
            other => Err(format!("unknown shipment status: {}", other)),
        }
    }
}

// ============================================================================
// Settlement input
// ============================================================================

/// One flight + seat + optional baggage selection for a number of passengers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub flight_id: i64,
    pub seat_id: i64,
    pub baggage_id: Option<i64>,
    pub passenger_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentEntry {
    pub address_id: i64,
    pub quantity: u32,
    pub description: Option<String>,
}

/// Largest shipment quantity a single order may carry (stored as INTEGER).
pub const MAX_SHIPMENT_QUANTITY: u32 = i32::MAX as u32;

/// Baggage shipping request attached to a checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRequest {
    pub cost: i64,
    pub entries: Vec<ShipmentEntry>,
}

impl ShipmentRequest {
    pub fn destination(&self) -> Option<i64> {
        self.entries.first().map(|e| e.address_id)
    }

    /// `None` when the entries add up past `MAX_SHIPMENT_QUANTITY`.
    pub fn total_quantity(&self) -> Option<u32> {
        self.entries
            .iter()
            .try_fold(0u32, |total, e| total.checked_add(e.quantity))
            .filter(|total| *total <= MAX_SHIPMENT_QUANTITY)
    }
}

#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub user_id: i64,
    pub payment_method_ref: i64,
    pub items: Vec<LineItem>,
    pub shipment: Option<ShipmentRequest>,
    pub idempotency_key: Option<String>,
}

// ============================================================================
// Catalog records (read through the inventory resolver)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatInventory {
    pub id: i64,
    pub flight_id: i64,
    pub seat_class: String,
    pub price: i64,
    pub remaining_stock: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaggageType {
    pub id: i64,
    pub name: String,
    pub price: i64,
    /// `None` means the baggage type is not stock-limited.
    pub remaining_stock: Option<i32>,
}

/// A stored card from the customer's wallet.
#[derive(Debug, Clone)]
pub struct PaymentMethod {
    pub id: i64,
    pub user_id: i64,
    pub brand: String,
    pub last4: String,
    pub token: Masked<String>,
    pub is_active: bool,
}

// ============================================================================
// Write models
// ============================================================================

/// Orders are always inserted as PENDING.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub payment_method_id: i64,
    pub total: i64,
    pub currency: String,
    pub idempotency_key: Option<String>,
}

/// Stock held by a PENDING order, restored on compensation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationLine {
    pub seat_id: i64,
    pub baggage_id: Option<i64>,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub order_id: i64,
    pub flight_id: i64,
    pub seat_id: i64,
    pub baggage_id: Option<i64>,
    pub price: i64,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub status: PaymentStatus,
    pub authorization_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewShipment {
    pub order_id: i64,
    pub user_id: i64,
    pub address_id: i64,
    pub quantity: u32,
    pub cost: i64,
    pub entries: Vec<ShipmentEntry>,
}

// ============================================================================
// Read models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub payment_method_id: i64,
    pub total: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub id: i64,
    pub order_id: i64,
    pub flight_id: i64,
    pub seat_id: i64,
    pub baggage_id: Option<i64>,
    pub price: i64,
    pub code: String,
    pub status: TicketStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub status: PaymentStatus,
    pub authorization_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shipment {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub address_id: i64,
    pub quantity: u32,
    pub cost: i64,
    pub status: ShipmentStatus,
    pub entries: Vec<ShipmentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: i64,
    pub total: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            total: order.total,
            currency: order.currency.clone(),
            status: order.status,
            created_at: order.created_at,
        }
    }
}

/// What a successful settlement hands back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub order: OrderSummary,
    pub tickets: Vec<Ticket>,
    pub shipment: Option<Shipment>,
}

impl SettlementReceipt {
    /// Σ ticket prices + shipment cost; equals `order.total` for every committed order.
    pub fn computed_total(&self) -> i64 {
        let tickets: i64 = self.tickets.iter().map(|t| t.price).sum();
        tickets + self.shipment.as_ref().map(|s| s.cost).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order: Order,
    pub tickets: Vec<Ticket>,
    pub payment: Option<Payment>,
    pub shipment: Option<Shipment>,
}
