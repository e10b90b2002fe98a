use async_trait::async_trait;
use chrono::Utc;
use skyfare_catalog::{PricingEngine, Quote};
use skyfare_core::events::EventPublisher;
use skyfare_core::models::{
    LineItem, NewOrder, NewPayment, NewShipment, OrderStatus, PaymentMethod, PaymentStatus,
    ReservationLine, MAX_SHIPMENT_QUANTITY, SettlementReceipt, SettlementRequest, ShipmentRequest,
};
use skyfare_core::payment::{AuthorizationOutcome, AuthorizationRequest, PaymentAuthorizer};
use skyfare_core::repository::{SettlementStore, SettlementTx};
use skyfare_core::{InventoryResource, SettlementError, SettlementResult, StoreError};
use skyfare_shared::models::{OrderFailedEvent, OrderPaidEvent, ORDER_FAILED_TOPIC, ORDER_PAID_TOPIC};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::fulfillment::TicketIssuer;
use crate::orchestrator::PaymentOrchestrator;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Knobs for the settlement flow, loaded from configuration.
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    pub currency: String,
    pub payment_timeout: Duration,
    pub max_passengers_per_item: u32,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            currency: "MXN".to_string(),
            payment_timeout: Duration::from_secs(10),
            max_passengers_per_item: 9,
        }
    }
}

/// Entry points exposed to the HTTP layer and background workers.
#[async_trait]
pub trait SettlementService: Send + Sync {
    /// Convert a cart into a PAID order with tickets, payment and optional shipment, or nothing at all.
    async fn settle(&self, request: SettlementRequest) -> SettlementResult<SettlementReceipt>;

    /// Price a cart from authoritative records without reserving anything.
    async fn quote(
        &self,
        items: &[LineItem],
        shipment: Option<&ShipmentRequest>,
    ) -> SettlementResult<Quote>;

    /// Fail and release PENDING orders older than `older_than`. Returns how many were compensated.
    async fn expire_stale(&self, older_than: Duration) -> SettlementResult<usize>;
}

/// Result of the reservation phase.
enum Reservation {
    /// A PAID order already exists for the idempotency key.
    Replayed(SettlementReceipt),
    Held(HeldOrder),
}

struct HeldOrder {
    order_id: i64,
    quote: Quote,
    payment_method: PaymentMethod,
}

trait StoreResultExt<T> {
    fn or_storage(self, correlation_id: Uuid) -> SettlementResult<T>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn or_storage(self, correlation_id: Uuid) -> SettlementResult<T> {
        self.map_err(|e| SettlementError::storage(correlation_id, e))
    }
}

/// Drives reserve → authorize → finalize, compensating whenever a later phase fails.
///
/// Phase one (one transaction): re-price the cart, conditionally decrement stock and
/// insert the order as PENDING. Phase two: authorize the total with no transaction open.
/// Phase three (one transaction): issue tickets, record the payment and shipment, and
/// flip the order to PAID. A failure after phase one runs `compensate`, which returns the
/// stock and marks the order FAILED in a single transaction.
pub struct SettlementOrchestrator<S: SettlementStore> {
    store: Arc<S>,
    payments: PaymentOrchestrator,
    events: Arc<dyn EventPublisher>,
    pricing: PricingEngine,
    tickets: TicketIssuer,
    policy: SettlementPolicy,
}

impl<S: SettlementStore> SettlementOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        authorizer: Arc<dyn PaymentAuthorizer>,
        events: Arc<dyn EventPublisher>,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            store,
            payments: PaymentOrchestrator::new(authorizer),
            events,
            pricing: PricingEngine::new(policy.currency.clone()),
            tickets: TicketIssuer::default(),
            policy,
        }
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    fn validate_cart(
        &self,
        items: &[LineItem],
        shipment: Option<&ShipmentRequest>,
    ) -> SettlementResult<()> {
        if items.is_empty() && shipment.is_none() {
            return Err(SettlementError::Validation(
                "Cart must contain at least one line item or a shipment".to_string(),
            ));
        }

        for (index, item) in items.iter().enumerate() {
            if item.passenger_count == 0 || item.passenger_count > self.policy.max_passengers_per_item {
                return Err(SettlementError::Validation(format!(
                    "Line item {} must have between 1 and {} passengers, got {}",
                    index, self.policy.max_passengers_per_item, item.passenger_count
                )));
            }
        }

        if let Some(shipment) = shipment {
            if shipment.cost < 0 {
                return Err(SettlementError::Validation(format!(
                    "Shipment cost must not be negative, got {}",
                    shipment.cost
                )));
            }
            let destination = shipment.destination().ok_or_else(|| {
                SettlementError::Validation("Shipment must contain at least one entry".to_string())
            })?;
            if shipment.entries.iter().any(|e| e.quantity == 0) {
                return Err(SettlementError::Validation(
                    "Shipment entry quantities must be at least 1".to_string(),
                ));
            }
            if shipment.total_quantity().is_none() {
                return Err(SettlementError::Validation(format!(
                    "Shipment quantity must not exceed {}",
                    MAX_SHIPMENT_QUANTITY
                )));
            }
            if shipment.entries.iter().any(|e| e.address_id != destination) {
                return Err(SettlementError::Validation(
                    "All shipment entries must share one destination address".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn validate(&self, request: &SettlementRequest) -> SettlementResult<()> {
        self.validate_cart(&request.items, request.shipment.as_ref())?;

        if let Some(key) = &request.idempotency_key {
            if key.trim().is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(SettlementError::Validation(format!(
                    "Idempotency key must be 1 to {} characters",
                    MAX_IDEMPOTENCY_KEY_LEN
                )));
            }
        }

        Ok(())
    }

    /// Resolve authoritative prices for every line and build the quote.
    async fn price_cart(
        &self,
        tx: &mut S::Tx,
        correlation_id: Uuid,
        items: &[LineItem],
        shipment: Option<&ShipmentRequest>,
    ) -> SettlementResult<Quote> {
        let mut lines = Vec::with_capacity(items.len());

        for item in items {
            let seat = tx
                .seat(item.seat_id)
                .await
                .or_storage(correlation_id)?
                .ok_or_else(|| SettlementError::Validation(format!("Unknown seat {}", item.seat_id)))?;

            let baggage = match item.baggage_id {
                Some(baggage_id) => Some(
                    tx.baggage(baggage_id)
                        .await
                        .or_storage(correlation_id)?
                        .ok_or_else(|| {
                            SettlementError::Validation(format!("Unknown baggage type {}", baggage_id))
                        })?,
                ),
                None => None,
            };

            let line = self
                .pricing
                .price_line(item, &seat, baggage.as_ref())
                .map_err(|e| SettlementError::Validation(e.to_string()))?;
            lines.push(line);
        }

        let quote = self
            .pricing
            .quote(lines, shipment)
            .map_err(|e| SettlementError::Validation(e.to_string()))?;

        if quote.total <= 0 {
            return Err(SettlementError::Validation(
                "Cart total must be greater than zero".to_string(),
            ));
        }

        Ok(quote)
    }

    async fn reserve(
        &self,
        correlation_id: Uuid,
        request: &SettlementRequest,
    ) -> SettlementResult<Reservation> {
        let mut tx = self.store.begin().await.or_storage(correlation_id)?;

        match self.reserve_in(&mut tx, correlation_id, request).await {
            Ok(Reservation::Held(held)) => {
                tx.commit().await.or_storage(correlation_id)?;
                Ok(Reservation::Held(held))
            }
            Ok(replayed) => {
                discard(tx).await;
                Ok(replayed)
            }
            Err(e) => {
                // Rolling back returns every unit decremented so far in this attempt.
                discard(tx).await;
                Err(e)
            }
        }
    }

    async fn reserve_in(
        &self,
        tx: &mut S::Tx,
        correlation_id: Uuid,
        request: &SettlementRequest,
    ) -> SettlementResult<Reservation> {
        if let Some(key) = &request.idempotency_key {
            let existing = tx
                .find_by_idempotency_key(request.user_id, key)
                .await
                .or_storage(correlation_id)?;

            if let Some(order) = existing {
                if order.status != OrderStatus::Paid {
                    return Err(SettlementError::DuplicateRequest(key.clone()));
                }
                let receipt = tx
                    .order_receipt(order.id)
                    .await
                    .or_storage(correlation_id)?
                    .ok_or_else(|| {
                        SettlementError::storage(
                            correlation_id,
                            format!("Paid order {} has no receipt", order.id),
                        )
                    })?;
                tracing::info!("Replaying settled order {} for idempotency key", order.id);
                return Ok(Reservation::Replayed(receipt));
            }
        }

        let payment_method = tx
            .payment_method(request.payment_method_ref)
            .await
            .or_storage(correlation_id)?
            .filter(|method| method.user_id == request.user_id && method.is_active)
            .ok_or_else(|| {
                SettlementError::InvalidPaymentMethod(format!(
                    "Payment method {} is not available to user {}",
                    request.payment_method_ref, request.user_id
                ))
            })?;

        if let Some(address_id) = request.shipment.as_ref().and_then(|s| s.destination()) {
            let owner = tx.address_owner(address_id).await.or_storage(correlation_id)?;
            if owner != Some(request.user_id) {
                return Err(SettlementError::Validation(format!(
                    "Address {} does not belong to user {}",
                    address_id, request.user_id
                )));
            }
        }

        let quote = self
            .price_cart(tx, correlation_id, &request.items, request.shipment.as_ref())
            .await?;

        for line in &quote.lines {
            let reserved = tx
                .reserve_seat(line.seat_id, line.passenger_count)
                .await
                .or_storage(correlation_id)?;
            if !reserved {
                tracing::warn!("Seat {} sold out during checkout", line.seat_id);
                return Err(SettlementError::InsufficientInventory {
                    resource: InventoryResource::Seat,
                    id: line.seat_id,
                    requested: line.passenger_count,
                });
            }

            if let Some(baggage_id) = line.baggage_id {
                let reserved = tx
                    .reserve_baggage(baggage_id, line.passenger_count)
                    .await
                    .or_storage(correlation_id)?;
                if !reserved {
                    tracing::warn!("Baggage type {} sold out during checkout", baggage_id);
                    return Err(SettlementError::InsufficientInventory {
                        resource: InventoryResource::Baggage,
                        id: baggage_id,
                        requested: line.passenger_count,
                    });
                }
            }
        }

        let order_id = tx
            .create_order(&NewOrder {
                user_id: request.user_id,
                payment_method_id: payment_method.id,
                total: quote.total,
                currency: quote.currency.clone(),
                idempotency_key: request.idempotency_key.clone(),
            })
            .await
            .or_storage(correlation_id)?;

        let reservations: Vec<ReservationLine> = quote
            .lines
            .iter()
            .map(|line| ReservationLine {
                seat_id: line.seat_id,
                baggage_id: line.baggage_id,
                quantity: line.passenger_count,
            })
            .collect();
        tx.record_reservations(order_id, &reservations)
            .await
            .or_storage(correlation_id)?;

        tracing::info!(order_id, total = quote.total, "Inventory reserved, order PENDING");

        Ok(Reservation::Held(HeldOrder {
            order_id,
            quote,
            payment_method,
        }))
    }

    async fn finalize(
        &self,
        request: &SettlementRequest,
        held: &HeldOrder,
        authorization_ref: &str,
    ) -> Result<SettlementReceipt, StoreError> {
        let mut tx = self.store.begin().await?;

        match self.finalize_in(&mut tx, request, held, authorization_ref).await {
            Ok(receipt) => {
                tx.commit().await?;
                Ok(receipt)
            }
            Err(e) => {
                discard(tx).await;
                Err(e)
            }
        }
    }

    async fn finalize_in(
        &self,
        tx: &mut S::Tx,
        request: &SettlementRequest,
        held: &HeldOrder,
        authorization_ref: &str,
    ) -> Result<SettlementReceipt, StoreError> {
        let order_id = held.order_id;

        for ticket in self.tickets.issue(order_id, &held.quote.lines) {
            tx.create_ticket(&ticket).await?;
        }

        if let Some(shipment) = &request.shipment {
            let address_id = shipment
                .destination()
                .ok_or("Shipment without destination reached finalization")?;
            tx.create_shipment(&NewShipment {
                order_id,
                user_id: request.user_id,
                address_id,
                quantity: shipment
                    .total_quantity()
                    .ok_or("Shipment quantity out of range reached finalization")?,
                cost: shipment.cost,
                entries: shipment.entries.clone(),
            })
            .await?;
        }

        tx.create_payment(&NewPayment {
            order_id,
            user_id: request.user_id,
            amount: held.quote.total,
            status: PaymentStatus::Approved,
            authorization_ref: Some(authorization_ref.to_string()),
        })
        .await?;

        if !tx
            .transition_order(order_id, OrderStatus::Pending, OrderStatus::Paid)
            .await?
        {
            return Err(format!("Order {} left PENDING before it could be finalized", order_id).into());
        }

        let receipt = tx
            .order_receipt(order_id)
            .await?
            .ok_or_else(|| format!("Order {} vanished during finalization", order_id))?;

        if receipt.order.total != held.quote.total || receipt.computed_total() != receipt.order.total {
            return Err(format!(
                "Order {} total {} does not match issued tickets and shipment ({})",
                order_id,
                receipt.order.total,
                receipt.computed_total()
            )
            .into());
        }

        Ok(receipt)
    }

    /// Fail a PENDING order and put its stock back. Returns `false` when the order had
    /// already left PENDING, in which case nothing is touched.
    async fn compensate(
        &self,
        order_id: i64,
        declined: Option<NewPayment>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.store.begin().await?;

        match compensate_in(&mut tx, order_id, declined).await {
            Ok(true) => {
                tx.commit().await?;
                Ok(true)
            }
            Ok(false) => {
                discard(tx).await;
                Ok(false)
            }
            Err(e) => {
                discard(tx).await;
                Err(e)
            }
        }
    }

    /// Compensation that never masks the original failure. If it cannot run now the
    /// stale-order sweeper picks the order up later.
    async fn compensate_logged(
        &self,
        correlation_id: Option<Uuid>,
        user_id: i64,
        order_id: i64,
        declined: Option<NewPayment>,
        reason: &str,
    ) -> bool {
        match self.compensate(order_id, declined).await {
            Ok(true) => {
                tracing::info!("Order {} marked FAILED and inventory released: {}", order_id, reason);
                self.publish(
                    ORDER_FAILED_TOPIC,
                    order_id,
                    &OrderFailedEvent {
                        order_id,
                        user_id,
                        reason: reason.to_string(),
                        correlation_id,
                        timestamp: Utc::now().timestamp(),
                    },
                )
                .await;
                true
            }
            Ok(false) => {
                tracing::info!("Order {} was no longer PENDING, nothing to compensate", order_id);
                false
            }
            Err(e) => {
                tracing::error!(
                    "Compensation for order {} failed, leaving it to the sweeper: {}",
                    order_id,
                    e
                );
                false
            }
        }
    }

    async fn publish<E: serde::Serialize>(&self, topic: &str, order_id: i64, event: &E) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to serialize {} event: {}", topic, e);
                return;
            }
        };
        if let Err(e) = self.events.publish(topic, &order_id.to_string(), &payload).await {
            tracing::error!("Failed to publish {} for order {}: {}", topic, order_id, e);
        }
    }

    async fn run_settlement(
        &self,
        correlation_id: Uuid,
        request: SettlementRequest,
    ) -> SettlementResult<SettlementReceipt> {
        self.validate(&request)?;

        let held = match self.reserve(correlation_id, &request).await? {
            Reservation::Replayed(receipt) => return Ok(receipt),
            Reservation::Held(held) => held,
        };

        let authorization = AuthorizationRequest {
            order_id: held.order_id,
            user_id: request.user_id,
            amount: held.quote.total,
            currency: held.quote.currency.clone(),
            payment_method: held.payment_method.clone(),
        };

        match self
            .payments
            .authorize_within(&authorization, self.policy.payment_timeout)
            .await
        {
            Ok(AuthorizationOutcome::Approved { authorization_ref }) => {
                match self.finalize(&request, &held, &authorization_ref).await {
                    Ok(receipt) => {
                        tracing::info!(
                            order_id = held.order_id,
                            tickets = receipt.tickets.len(),
                            "Settlement completed"
                        );
                        self.publish(
                            ORDER_PAID_TOPIC,
                            held.order_id,
                            &OrderPaidEvent {
                                order_id: held.order_id,
                                user_id: request.user_id,
                                total: receipt.order.total,
                                currency: receipt.order.currency.clone(),
                                ticket_count: receipt.tickets.len(),
                                has_shipment: receipt.shipment.is_some(),
                                correlation_id,
                                timestamp: Utc::now().timestamp(),
                            },
                        )
                        .await;
                        Ok(receipt)
                    }
                    Err(source) => {
                        tracing::error!(
                            %correlation_id,
                            "Finalizing order {} failed: {}",
                            held.order_id,
                            source
                        );
                        self.payments.void(&authorization_ref).await;
                        self.compensate_logged(
                            Some(correlation_id),
                            request.user_id,
                            held.order_id,
                            None,
                            "storage failure",
                        )
                        .await;
                        Err(SettlementError::storage(correlation_id, source))
                    }
                }
            }
            Ok(AuthorizationOutcome::Declined { reason }) => {
                let declined = NewPayment {
                    order_id: held.order_id,
                    user_id: request.user_id,
                    amount: held.quote.total,
                    status: PaymentStatus::Declined,
                    authorization_ref: None,
                };
                self.compensate_logged(
                    Some(correlation_id),
                    request.user_id,
                    held.order_id,
                    Some(declined),
                    "payment declined",
                )
                .await;
                Err(SettlementError::PaymentDeclined(reason))
            }
            Err(e) => {
                let reason = e.kind().as_str();
                self.compensate_logged(Some(correlation_id), request.user_id, held.order_id, None, reason)
                    .await;
                Err(e)
            }
        }
    }
}

async fn compensate_in<T: SettlementTx>(
    tx: &mut T,
    order_id: i64,
    declined: Option<NewPayment>,
) -> Result<bool, StoreError> {
    if !tx
        .transition_order(order_id, OrderStatus::Pending, OrderStatus::Failed)
        .await?
    {
        return Ok(false);
    }

    for line in tx.reservations(order_id).await? {
        tx.release_seat(line.seat_id, line.quantity).await?;
        if let Some(baggage_id) = line.baggage_id {
            tx.release_baggage(baggage_id, line.quantity).await?;
        }
    }

    if let Some(payment) = declined {
        tx.create_payment(&payment).await?;
    }

    Ok(true)
}

async fn discard<T: SettlementTx>(tx: T) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("Rollback failed: {}", e);
    }
}

#[async_trait]
impl<S> SettlementService for SettlementOrchestrator<S>
where
    S: SettlementStore + 'static,
{
    async fn settle(&self, request: SettlementRequest) -> SettlementResult<SettlementReceipt> {
        let correlation_id = Uuid::new_v4();
        let span = tracing::info_span!("settlement", %correlation_id, user_id = request.user_id);
        self.run_settlement(correlation_id, request).instrument(span).await
    }

    async fn quote(
        &self,
        items: &[LineItem],
        shipment: Option<&ShipmentRequest>,
    ) -> SettlementResult<Quote> {
        self.validate_cart(items, shipment)?;

        let correlation_id = Uuid::new_v4();
        let mut tx = self.store.begin().await.or_storage(correlation_id)?;
        let quote = self.price_cart(&mut tx, correlation_id, items, shipment).await;
        discard(tx).await;
        quote
    }

    async fn expire_stale(&self, older_than: Duration) -> SettlementResult<usize> {
        let correlation_id = Uuid::new_v4();
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| SettlementError::Validation(format!("Invalid pending TTL: {}", e)))?;
        let cutoff = Utc::now() - age;

        let mut tx = self.store.begin().await.or_storage(correlation_id)?;
        let stale = tx.stale_pending_orders(cutoff).await;
        discard(tx).await;
        let stale = stale.or_storage(correlation_id)?;

        let mut expired = 0;
        for order in stale {
            if self
                .compensate_logged(None, order.user_id, order.id, None, "pending order expired")
                .await
            {
                expired += 1;
            }
        }

        if expired > 0 {
            tracing::info!("Expired {} stale PENDING orders", expired);
        }
        Ok(expired)
    }
}
