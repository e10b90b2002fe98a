use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skyfare_core::models::{
    BaggageType, NewOrder, NewPayment, NewShipment, NewTicket, Order, OrderDetail, OrderStatus,
    OrderSummary, Payment, PaymentMethod, ReservationLine, SeatInventory, SettlementReceipt,
    Shipment, ShipmentEntry, Ticket,
};
use skyfare_core::repository::{OrderReader, SettlementStore, SettlementTx};
use skyfare_core::StoreError;
use skyfare_shared::Masked;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct SeatRow {
    id: i64,
    flight_id: i64,
    seat_class: String,
    price: i64,
    remaining_stock: i32,
}

#[derive(sqlx::FromRow)]
struct BaggageRow {
    id: i64,
    name: String,
    price: i64,
    remaining_stock: Option<i32>,
}

#[derive(sqlx::FromRow)]
struct PaymentMethodRow {
    id: i64,
    user_id: i64,
    brand: String,
    last4: String,
    token: String,
    is_active: bool,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    payment_method_id: i64,
    total: i64,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    seat_id: i64,
    baggage_type_id: Option<i64>,
    quantity: i32,
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: i64,
    order_id: i64,
    flight_id: i64,
    seat_id: i64,
    baggage_type_id: Option<i64>,
    price: i64,
    code: String,
    status: String,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    order_id: i64,
    user_id: i64,
    amount: i64,
    status: String,
    authorization_ref: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ShipmentRow {
    id: i64,
    order_id: i64,
    user_id: i64,
    address_id: i64,
    quantity: i32,
    cost: i64,
    status: String,
    entries: Json<Vec<ShipmentEntry>>,
}

const ORDER_COLUMNS: &str =
    "id, user_id, payment_method_id, total, currency, status, created_at, updated_at";
const TICKET_COLUMNS: &str =
    "id, order_id, flight_id, seat_id, baggage_type_id, price, code, status";
const PAYMENT_COLUMNS: &str =
    "id, order_id, user_id, amount, status, authorization_ref, created_at";
const SHIPMENT_COLUMNS: &str =
    "id, order_id, user_id, address_id, quantity, cost, status, entries";

impl From<SeatRow> for SeatInventory {
    fn from(row: SeatRow) -> Self {
        SeatInventory {
            id: row.id,
            flight_id: row.flight_id,
            seat_class: row.seat_class,
            price: row.price,
            remaining_stock: row.remaining_stock,
        }
    }
}

impl From<BaggageRow> for BaggageType {
    fn from(row: BaggageRow) -> Self {
        BaggageType {
            id: row.id,
            name: row.name,
            price: row.price,
            remaining_stock: row.remaining_stock,
        }
    }
}

impl From<PaymentMethodRow> for PaymentMethod {
    fn from(row: PaymentMethodRow) -> Self {
        PaymentMethod {
            id: row.id,
            user_id: row.user_id,
            brand: row.brand,
            last4: row.last4,
            token: Masked::new(row.token),
            is_active: row.is_active,
        }
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            payment_method_id: row.payment_method_id,
            total: row.total,
            currency: row.currency,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<ReservationRow> for ReservationLine {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(ReservationLine {
            seat_id: row.seat_id,
            baggage_id: row.baggage_type_id,
            quantity: u32::try_from(row.quantity)?,
        })
    }
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            order_id: row.order_id,
            flight_id: row.flight_id,
            seat_id: row.seat_id,
            baggage_id: row.baggage_type_id,
            price: row.price,
            code: row.code,
            status: row.status.parse()?,
        })
    }
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            amount: row.amount,
            status: row.status.parse()?,
            authorization_ref: row.authorization_ref,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<ShipmentRow> for Shipment {
    type Error = StoreError;

    fn try_from(row: ShipmentRow) -> Result<Self, Self::Error> {
        Ok(Shipment {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            address_id: row.address_id,
            quantity: u32::try_from(row.quantity)?,
            cost: row.cost,
            status: row.status.parse()?,
            entries: row.entries.0,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Postgres-backed settlement store.
#[derive(Clone)]
pub struct PgSettlementStore {
    pool: PgPool,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettlementStore for PgSettlementStore {
    type Tx = PgSettlementTx;

    async fn begin(&self) -> Result<PgSettlementTx, StoreError> {
        Ok(PgSettlementTx {
            tx: self.pool.begin().await?,
        })
    }
}

/// One Postgres transaction. sqlx rolls it back on drop if it was never committed.
pub struct PgSettlementTx {
    tx: Transaction<'static, Postgres>,
}

impl PgSettlementTx {
    async fn tickets_of(&mut self, order_id: i64) -> Result<Vec<Ticket>, StoreError> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tickets WHERE order_id = $1 ORDER BY id",
            TICKET_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
    }

    async fn shipment_of(&mut self, order_id: i64) -> Result<Option<Shipment>, StoreError> {
        let row: Option<ShipmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM shipments WHERE order_id = $1",
            SHIPMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Shipment::try_from).transpose()
    }
}

#[async_trait]
impl SettlementTx for PgSettlementTx {
    async fn seat(&mut self, seat_id: i64) -> Result<Option<SeatInventory>, StoreError> {
        let row: Option<SeatRow> = sqlx::query_as(
            "SELECT id, flight_id, seat_class, price, remaining_stock FROM seats WHERE id = $1",
        )
        .bind(seat_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(SeatInventory::from))
    }

    async fn baggage(&mut self, baggage_id: i64) -> Result<Option<BaggageType>, StoreError> {
        let row: Option<BaggageRow> = sqlx::query_as(
            "SELECT id, name, price, remaining_stock FROM baggage_types WHERE id = $1",
        )
        .bind(baggage_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(BaggageType::from))
    }

    async fn reserve_seat(&mut self, seat_id: i64, count: u32) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE seats SET remaining_stock = remaining_stock - $2 WHERE id = $1 AND remaining_stock >= $2",
        )
        .bind(seat_id)
        .bind(i32::try_from(count)?)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_seat(&mut self, seat_id: i64, count: u32) -> Result<(), StoreError> {
        sqlx::query("UPDATE seats SET remaining_stock = remaining_stock + $2 WHERE id = $1")
            .bind(seat_id)
            .bind(i32::try_from(count)?)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn reserve_baggage(&mut self, baggage_id: i64, count: u32) -> Result<bool, StoreError> {
        // NULL - n stays NULL, so unlimited types pass through untouched.
        let result = sqlx::query(
            r#"
            UPDATE baggage_types SET remaining_stock = remaining_stock - $2
            WHERE id = $1 AND (remaining_stock IS NULL OR remaining_stock >= $2)
            "#,
        )
        .bind(baggage_id)
        .bind(i32::try_from(count)?)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_baggage(&mut self, baggage_id: i64, count: u32) -> Result<(), StoreError> {
        sqlx::query("UPDATE baggage_types SET remaining_stock = remaining_stock + $2 WHERE id = $1")
            .bind(baggage_id)
            .bind(i32::try_from(count)?)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn payment_method(&mut self, id: i64) -> Result<Option<PaymentMethod>, StoreError> {
        let row: Option<PaymentMethodRow> = sqlx::query_as(
            "SELECT id, user_id, brand, last4, token, is_active FROM payment_methods WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(PaymentMethod::from))
    }

    async fn address_owner(&mut self, address_id: i64) -> Result<Option<i64>, StoreError> {
        let owner: Option<i64> = sqlx::query_scalar("SELECT user_id FROM addresses WHERE id = $1")
            .bind(address_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(owner)
    }

    async fn find_by_idempotency_key(
        &mut self,
        user_id: i64,
        key: &str,
    ) -> Result<Option<Order>, StoreError> {
        // Serializes concurrent attempts with the same key until this transaction ends.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($2, $1))")
            .bind(user_id)
            .bind(key)
            .execute(&mut *self.tx)
            .await?;

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM orders
            WHERE user_id = $1 AND idempotency_key = $2 AND status <> 'FAILED'
            ORDER BY id DESC LIMIT 1
            "#,
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn create_order(&mut self, order: &NewOrder) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (user_id, payment_method_id, total, currency, status, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(order.user_id)
        .bind(order.payment_method_id)
        .bind(order.total)
        .bind(&order.currency)
        .bind(OrderStatus::Pending.as_str())
        .bind(order.idempotency_key.as_deref())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn record_reservations(
        &mut self,
        order_id: i64,
        lines: &[ReservationLine],
    ) -> Result<(), StoreError> {
        for line in lines {
            sqlx::query(
                "INSERT INTO order_reservations (order_id, seat_id, baggage_type_id, quantity) VALUES ($1, $2, $3, $4)",
            )
            .bind(order_id)
            .bind(line.seat_id)
            .bind(line.baggage_id)
            .bind(i32::try_from(line.quantity)?)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn reservations(&mut self, order_id: i64) -> Result<Vec<ReservationLine>, StoreError> {
        let rows: Vec<ReservationRow> = sqlx::query_as(
            "SELECT seat_id, baggage_type_id, quantity FROM order_reservations WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
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
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(order_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_ticket(&mut self, ticket: &NewTicket) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tickets (order_id, flight_id, seat_id, baggage_type_id, price, code, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'ISSUED')
            RETURNING id
            "#,
        )
        .bind(ticket.order_id)
        .bind(ticket.flight_id)
        .bind(ticket.seat_id)
        .bind(ticket.baggage_id)
        .bind(ticket.price)
        .bind(&ticket.code)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn create_payment(&mut self, payment: &NewPayment) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO payments (order_id, user_id, amount, status, authorization_ref)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(payment.order_id)
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(payment.authorization_ref.as_deref())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn create_shipment(&mut self, shipment: &NewShipment) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO shipments (order_id, user_id, address_id, quantity, cost, status, entries)
            VALUES ($1, $2, $3, $4, $5, 'REQUESTED', $6)
            RETURNING id
            "#,
        )
        .bind(shipment.order_id)
        .bind(shipment.user_id)
        .bind(shipment.address_id)
        .bind(i32::try_from(shipment.quantity)?)
        .bind(shipment.cost)
        .bind(Json(&shipment.entries))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn order_receipt(&mut self, order_id: i64) -> Result<Option<SettlementReceipt>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let order = Order::try_from(row)?;

        Ok(Some(SettlementReceipt {
            order: OrderSummary::from(&order),
            tickets: self.tickets_of(order_id).await?,
            shipment: self.shipment_of(order_id).await?,
        }))
    }

    async fn stale_pending_orders(
        &mut self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE status = 'PENDING' AND created_at < $1 ORDER BY id",
            ORDER_COLUMNS
        ))
        .bind(created_before)
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderReader for PgSettlementStore {
    async fn get_order(&self, user_id: i64, order_id: i64) -> Result<Option<OrderDetail>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE id = $1 AND user_id = $2 AND status <> 'PENDING'",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tickets: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tickets WHERE order_id = $1 ORDER BY id",
            TICKET_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        let payment: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE order_id = $1 ORDER BY id DESC LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        let shipment: Option<ShipmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM shipments WHERE order_id = $1",
            SHIPMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(OrderDetail {
            order: Order::try_from(row)?,
            tickets: collect(tickets)?,
            payment: payment.map(Payment::try_from).transpose()?,
            shipment: shipment.map(Shipment::try_from).transpose()?,
        }))
    }

    async fn list_orders(&self, user_id: i64) -> Result<Vec<OrderSummary>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE user_id = $1 AND status <> 'PENDING' ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let orders: Vec<Order> = collect(rows)?;
        Ok(orders.iter().map(OrderSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfare_core::models::PaymentStatus;

    #[test]
    fn test_rows_map_to_domain() {
        let order = Order::try_from(OrderRow {
            id: 1,
            user_id: 7,
            payment_method_id: 3,
            total: 950,
            currency: "MXN".into(),
            status: "PAID".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        let payment = Payment::try_from(PaymentRow {
            id: 2,
            order_id: 1,
            user_id: 7,
            amount: 950,
            status: "DECLINED".into(),
            authorization_ref: None,
            created_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(payment.status, PaymentStatus::Declined);
    }

    #[test]
    fn test_rejects_unknown_status_and_negative_quantity() {
        let bad_status = Ticket::try_from(TicketRow {
            id: 1,
            order_id: 1,
            flight_id: 10,
            seat_id: 55,
            baggage_type_id: None,
            price: 1200,
            code: "SKY-00000001-001".into(),
            status: "VOID".into(),
        });
        assert!(bad_status.is_err());

        let bad_quantity = ReservationLine::try_from(ReservationRow {
            seat_id: 55,
            baggage_type_id: None,
            quantity: -1,
        });
        assert!(bad_quantity.is_err());
    }

    #[test]
    fn test_payment_method_token_is_masked() {
        let method = PaymentMethod::from(PaymentMethodRow {
            id: 3,
            user_id: 7,
            brand: "VISA".into(),
            last4: "4242".into(),
            token: "tok_visa".into(),
            is_active: true,
        });
        assert_eq!(method.token.expose(), "tok_visa");
        assert!(!format!("{:?}", method).contains("tok_visa"));
    }
}
