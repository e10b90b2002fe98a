use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    BaggageType, NewOrder, NewPayment, NewShipment, NewTicket, Order, OrderDetail, OrderStatus,
    OrderSummary, PaymentMethod, ReservationLine, SeatInventory, SettlementReceipt,
};
use crate::StoreError;

/// One unit of work against the backing store.
///
/// Everything written through a transaction becomes visible to other readers only
/// on `commit`. Dropping a transaction without committing discards its writes,
/// including stock decrements.
#[async_trait]
pub trait SettlementTx: Send {
    // ------------------------------------------------------------------
    // Inventory & price resolution
    // ------------------------------------------------------------------

    async fn seat(&mut self, seat_id: i64) -> Result<Option<SeatInventory>, StoreError>;

    async fn baggage(&mut self, baggage_id: i64) -> Result<Option<BaggageType>, StoreError>;

    /// Conditional decrement; `false` when fewer than `count` units remain.
    async fn reserve_seat(&mut self, seat_id: i64, count: u32) -> Result<bool, StoreError>;

    async fn release_seat(&mut self, seat_id: i64, count: u32) -> Result<(), StoreError>;

    /// Always succeeds for baggage types without a stock limit.
    async fn reserve_baggage(&mut self, baggage_id: i64, count: u32) -> Result<bool, StoreError>;

    async fn release_baggage(&mut self, baggage_id: i64, count: u32) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Ownership lookups
    // ------------------------------------------------------------------

    async fn payment_method(&mut self, id: i64) -> Result<Option<PaymentMethod>, StoreError>;

    /// Owning user of a shipping address.
    async fn address_owner(&mut self, address_id: i64) -> Result<Option<i64>, StoreError>;

    /// Latest non-failed order carrying this idempotency key.
    async fn find_by_idempotency_key(
        &mut self,
        user_id: i64,
        key: &str,
    ) -> Result<Option<Order>, StoreError>;

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    async fn create_order(&mut self, order: &NewOrder) -> Result<i64, StoreError>;

    async fn record_reservations(
        &mut self,
        order_id: i64,
        lines: &[ReservationLine],
    ) -> Result<(), StoreError>;

    async fn reservations(&mut self, order_id: i64) -> Result<Vec<ReservationLine>, StoreError>;

    /// Compare-and-set on the order status; `false` when the order is not in `from`.
    async fn transition_order(
        &mut self,
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError>;

    async fn create_ticket(&mut self, ticket: &NewTicket) -> Result<i64, StoreError>;

    async fn create_payment(&mut self, payment: &NewPayment) -> Result<i64, StoreError>;

    async fn create_shipment(&mut self, shipment: &NewShipment) -> Result<i64, StoreError>;

    async fn order_receipt(&mut self, order_id: i64) -> Result<Option<SettlementReceipt>, StoreError>;

    async fn stale_pending_orders(
        &mut self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Opens settlement transactions.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    type Tx: SettlementTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// Customer-facing read side. PENDING orders are never returned.
#[async_trait]
pub trait OrderReader: Send + Sync {
    async fn get_order(&self, user_id: i64, order_id: i64) -> Result<Option<OrderDetail>, StoreError>;

    async fn list_orders(&self, user_id: i64) -> Result<Vec<OrderSummary>, StoreError>;
}
