use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skyfare_catalog::{InventoryError, InventoryManager, StockKey};
use skyfare_core::models::{
    BaggageType, NewOrder, NewPayment, NewShipment, NewTicket, Order, OrderDetail, OrderStatus,
    OrderSummary, Payment, PaymentMethod, ReservationLine, SeatInventory, SettlementReceipt,
    Shipment, ShipmentStatus, Ticket, TicketStatus,
};
use skyfare_core::repository::{OrderReader, SettlementStore, SettlementTx};
use skyfare_core::StoreError;
use skyfare_shared::Masked;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone)]
struct StoredOrder {
    order: Order,
    idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    seats: HashMap<i64, SeatInventory>,
    baggage: HashMap<i64, BaggageType>,
    stock: InventoryManager,
    payment_methods: HashMap<i64, PaymentMethod>,
    addresses: HashMap<i64, i64>,
    orders: BTreeMap<i64, StoredOrder>,
    reservations: HashMap<i64, Vec<ReservationLine>>,
    tickets: Vec<Ticket>,
    payments: Vec<Payment>,
    shipments: Vec<Shipment>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn receipt(&self, order_id: i64) -> Option<SettlementReceipt> {
        let stored = self.orders.get(&order_id)?;
        Some(SettlementReceipt {
            order: OrderSummary::from(&stored.order),
            tickets: self.tickets_of(order_id),
            shipment: self.shipment_of(order_id),
        })
    }

    fn tickets_of(&self, order_id: i64) -> Vec<Ticket> {
        self.tickets
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    fn shipment_of(&self, order_id: i64) -> Option<Shipment> {
        self.shipments.iter().find(|s| s.order_id == order_id).cloned()
    }
}

/// In-process settlement store.
///
/// A transaction holds the state lock from `begin` until `commit`/`rollback` and works
/// on a private copy, so transactions are fully serialized and an abandoned one leaves
/// no trace. Used by tests and local runs without Postgres.
#[derive(Clone)]
pub struct InMemorySettlementStore {
    state: Arc<Mutex<MemoryState>>,
    fail_ticket_writes: Arc<AtomicBool>,
}

impl InMemorySettlementStore {
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Make every subsequent ticket insert fail, to exercise compensation.
    pub fn set_ticket_writes_failing(&self, failing: bool) {
        self.fail_ticket_writes.store(failing, Ordering::SeqCst);
    }

    pub async fn remaining_seats(&self, seat_id: i64) -> Option<i32> {
        self.state.lock().await.stock.available(&StockKey::Seat(seat_id))
    }

    pub async fn remaining_baggage(&self, baggage_id: i64) -> Option<i32> {
        self.state
            .lock()
            .await
            .stock
            .available(&StockKey::Baggage(baggage_id))
    }

    pub async fn orders_with_status(&self, status: OrderStatus) -> usize {
        self.state
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.order.status == status)
            .count()
    }

    pub async fn order_status(&self, order_id: i64) -> Option<OrderStatus> {
        self.state
            .lock()
            .await
            .orders
            .get(&order_id)
            .map(|o| o.order.status)
    }

    pub async fn ticket_count(&self) -> usize {
        self.state.lock().await.tickets.len()
    }

    pub async fn shipment_count(&self) -> usize {
        self.state.lock().await.shipments.len()
    }

    pub async fn payments_for(&self, order_id: i64) -> Vec<Payment> {
        self.state
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect()
    }
}

/// Seeds catalog, wallet and address data.
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    state: MemoryState,
}

impl InMemoryStoreBuilder {
    pub fn seat(mut self, id: i64, flight_id: i64, price: i64, remaining_stock: i32) -> Self {
        self.state.seats.insert(
            id,
            SeatInventory {
                id,
                flight_id,
                seat_class: "ECONOMY".to_string(),
                price,
                remaining_stock,
            },
        );
        self.state.stock.initialize(StockKey::Seat(id), Some(remaining_stock));
        self
    }

    pub fn baggage(mut self, id: i64, price: i64, remaining_stock: Option<i32>) -> Self {
        self.state.baggage.insert(
            id,
            BaggageType {
                id,
                name: format!("Baggage {}", id),
                price,
                remaining_stock,
            },
        );
        self.state.stock.initialize(StockKey::Baggage(id), remaining_stock);
        self
    }

    pub fn payment_method(mut self, id: i64, user_id: i64, token: &str, is_active: bool) -> Self {
        self.state.payment_methods.insert(
            id,
            PaymentMethod {
                id,
                user_id,
                brand: "VISA".to_string(),
                last4: "4242".to_string(),
                token: Masked::new(token.to_string()),
                is_active,
            },
        );
        self
    }

    pub fn address(mut self, id: i64, user_id: i64) -> Self {
        self.state.addresses.insert(id, user_id);
        self
    }

    pub fn build(self) -> InMemorySettlementStore {
        InMemorySettlementStore {
            state: Arc::new(Mutex::new(self.state)),
            fail_ticket_writes: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl SettlementStore for InMemorySettlementStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTx {
            guard,
            working,
            fail_ticket_writes: self.fail_ticket_writes.clone(),
        })
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_ticket_writes: Arc<AtomicBool>,
}

impl InMemoryTx {
    fn take(&mut self, key: StockKey, count: u32) -> Result<bool, StoreError> {
        let count = i32::try_from(count)?;
        match self.working.stock.reserve(&key, count) {
            Ok(()) => Ok(true),
            Err(InventoryError::InsufficientInventory { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn give_back(&mut self, key: StockKey, count: u32) -> Result<(), StoreError> {
        let count = i32::try_from(count)?;
        self.working.stock.release(&key, count)?;
        Ok(())
    }
}

#[async_trait]
impl SettlementTx for InMemoryTx {
    async fn seat(&mut self, seat_id: i64) -> Result<Option<SeatInventory>, StoreError> {
        let stock = &self.working.stock;
        Ok(self.working.seats.get(&seat_id).map(|seat| SeatInventory {
            remaining_stock: stock.available(&StockKey::Seat(seat_id)).unwrap_or(0),
            ..seat.clone()
        }))
    }

    async fn baggage(&mut self, baggage_id: i64) -> Result<Option<BaggageType>, StoreError> {
        let stock = &self.working.stock;
        Ok(self.working.baggage.get(&baggage_id).map(|bag| BaggageType {
            remaining_stock: stock.available(&StockKey::Baggage(baggage_id)),
            ..bag.clone()
        }))
    }

    async fn reserve_seat(&mut self, seat_id: i64, count: u32) -> Result<bool, StoreError> {
        self.take(StockKey::Seat(seat_id), count)
    }

    async fn release_seat(&mut self, seat_id: i64, count: u32) -> Result<(), StoreError> {
        self.give_back(StockKey::Seat(seat_id), count)
    }

    async fn reserve_baggage(&mut self, baggage_id: i64, count: u32) -> Result<bool, StoreError> {
        self.take(StockKey::Baggage(baggage_id), count)
    }

    async fn release_baggage(&mut self, baggage_id: i64, count: u32) -> Result<(), StoreError> {
        self.give_back(StockKey::Baggage(baggage_id), count)
    }

    async fn payment_method(&mut self, id: i64) -> Result<Option<PaymentMethod>, StoreError> {
        Ok(self.working.payment_methods.get(&id).cloned())
    }

    async fn address_owner(&mut self, address_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self.working.addresses.get(&address_id).copied())
    }

    async fn find_by_idempotency_key(
        &mut self,
        user_id: i64,
        key: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .working
            .orders
            .values()
            .rev()
            .find(|o| {
                o.order.user_id == user_id
                    && o.order.status != OrderStatus::Failed
                    && o.idempotency_key.as_deref() == Some(key)
            })
            .map(|o| o.order.clone()))
    }

    async fn create_order(&mut self, order: &NewOrder) -> Result<i64, StoreError> {
        let id = self.working.next_id();
        let now = Utc::now();
        self.working.orders.insert(
            id,
            StoredOrder {
                order: Order {
                    id,
                    user_id: order.user_id,
                    payment_method_id: order.payment_method_id,
                    total: order.total,
                    currency: order.currency.clone(),
                    status: OrderStatus::Pending,
                    created_at: now,
                    updated_at: now,
                },
                idempotency_key: order.idempotency_key.clone(),
            },
        );
        Ok(id)
    }

    async fn record_reservations(
        &mut self,
        order_id: i64,
        lines: &[ReservationLine],
    ) -> Result<(), StoreError> {
        self.working
            .reservations
            .entry(order_id)
            .or_default()
            .extend_from_slice(lines);
        Ok(())
    }

    async fn reservations(&mut self, order_id: i64) -> Result<Vec<ReservationLine>, StoreError> {
        Ok(self
            .working
            .reservations
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn transition_order(
        &mut self,
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        if !from.can_transition_to(to) {
            return Err(format!("Illegal order transition {} -> {}", from, to).into());
        }
        match self.working.orders.get_mut(&order_id) {
            Some(stored) if stored.order.status == from => {
                stored.order.status = to;
                stored.order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_ticket(&mut self, ticket: &NewTicket) -> Result<i64, StoreError> {
        if self.fail_ticket_writes.load(Ordering::SeqCst) {
            return Err("ticket insert rejected".into());
        }
        let id = self.working.next_id();
        self.working.tickets.push(Ticket {
            id,
            order_id: ticket.order_id,
            flight_id: ticket.flight_id,
            seat_id: ticket.seat_id,
            baggage_id: ticket.baggage_id,
            price: ticket.price,
            code: ticket.code.clone(),
            status: TicketStatus::Issued,
        });
        Ok(id)
    }

    async fn create_payment(&mut self, payment: &NewPayment) -> Result<i64, StoreError> {
        let id = self.working.next_id();
        self.working.payments.push(Payment {
            id,
            order_id: payment.order_id,
            user_id: payment.user_id,
            amount: payment.amount,
            status: payment.status,
            authorization_ref: payment.authorization_ref.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn create_shipment(&mut self, shipment: &NewShipment) -> Result<i64, StoreError> {
        let id = self.working.next_id();
        self.working.shipments.push(Shipment {
            id,
            order_id: shipment.order_id,
            user_id: shipment.user_id,
            address_id: shipment.address_id,
            quantity: shipment.quantity,
            cost: shipment.cost,
            status: ShipmentStatus::Requested,
            entries: shipment.entries.clone(),
        });
        Ok(id)
    }

    async fn order_receipt(&mut self, order_id: i64) -> Result<Option<SettlementReceipt>, StoreError> {
        Ok(self.working.receipt(order_id))
    }

    async fn stale_pending_orders(
        &mut self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .working
            .orders
            .values()
            .filter(|o| o.order.status == OrderStatus::Pending && o.order.created_at < created_before)
            .map(|o| o.order.clone())
            .collect())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl OrderReader for InMemorySettlementStore {
    async fn get_order(&self, user_id: i64, order_id: i64) -> Result<Option<OrderDetail>, StoreError> {
        let state = self.state.lock().await;
        let Some(stored) = state.orders.get(&order_id) else {
            return Ok(None);
        };
        if stored.order.user_id != user_id || stored.order.status == OrderStatus::Pending {
            return Ok(None);
        }

        Ok(Some(OrderDetail {
            order: stored.order.clone(),
            tickets: state.tickets_of(order_id),
            payment: state
                .payments
                .iter()
                .rev()
                .find(|p| p.order_id == order_id)
                .cloned(),
            shipment: state.shipment_of(order_id),
        }))
    }

    async fn list_orders(&self, user_id: i64) -> Result<Vec<OrderSummary>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .rev()
            .filter(|o| o.order.user_id == user_id && o.order.status != OrderStatus::Pending)
            .map(|o| OrderSummary::from(&o.order))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemorySettlementStore {
        InMemorySettlementStore::builder()
            .seat(55, 10, 800, 2)
            .baggage(7, 150, None)
            .build()
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = store();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.reserve_seat(55, 2).await.unwrap());
        assert!(!tx.reserve_seat(55, 1).await.unwrap());
        tx.rollback().await.unwrap();

        assert_eq!(store.remaining_seats(55).await, Some(2));
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = store();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.reserve_seat(55, 1).await.unwrap());
        assert!(tx.reserve_baggage(7, 40).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.remaining_seats(55).await, Some(1));
        assert_eq!(store.remaining_baggage(7).await, None);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = store();

        let mut tx = store.begin().await.unwrap();
        let order_id = tx
            .create_order(&NewOrder {
                user_id: 1,
                payment_method_id: 3,
                total: 800,
                currency: "MXN".into(),
                idempotency_key: None,
            })
            .await
            .unwrap();
        assert!(tx
            .transition_order(order_id, OrderStatus::Pending, OrderStatus::Paid)
            .await
            .unwrap());
        assert!(!tx
            .transition_order(order_id, OrderStatus::Pending, OrderStatus::Failed)
            .await
            .unwrap());
        assert!(tx
            .transition_order(order_id, OrderStatus::Paid, OrderStatus::Failed)
            .await
            .is_err());
        tx.commit().await.unwrap();

        assert_eq!(store.order_status(order_id).await, Some(OrderStatus::Paid));
    }

    #[tokio::test]
    async fn test_pending_orders_are_hidden_from_readers() {
        let store = store();

        let mut tx = store.begin().await.unwrap();
        let order_id = tx
            .create_order(&NewOrder {
                user_id: 1,
                payment_method_id: 3,
                total: 800,
                currency: "MXN".into(),
                idempotency_key: None,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(store.get_order(1, order_id).await.unwrap().is_none());
        assert!(store.list_orders(1).await.unwrap().is_empty());
    }
}
