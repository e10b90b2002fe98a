use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use skyfare_catalog::{PricedLine, Quote};
use skyfare_core::models::{
    LineItem, OrderStatus, SettlementReceipt, SettlementRequest, Shipment, ShipmentRequest,
    ShipmentStatus, Ticket,
};
use std::time::Instant;

use crate::error::{AppError, Envelope};
use crate::middleware::CustomerClaims;
use crate::state::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub user_id: i64,
    pub payment_method_ref: i64,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub shipment: Option<ShipmentRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub shipment: Option<ShipmentRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: i64,
    pub total: i64,
    pub status: OrderStatus,
    pub currency: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketView {
    pub id: i64,
    pub flight_id: i64,
    pub seat_id: i64,
    pub baggage_id: Option<i64>,
    pub price: i64,
    pub code: String,
}

impl From<Ticket> for TicketView {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            flight_id: ticket.flight_id,
            seat_id: ticket.seat_id,
            baggage_id: ticket.baggage_id,
            price: ticket.price,
            code: ticket.code,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentView {
    pub id: i64,
    pub address_id: i64,
    pub quantity: u32,
    pub cost: i64,
    pub status: ShipmentStatus,
}

impl From<Shipment> for ShipmentView {
    fn from(shipment: Shipment) -> Self {
        Self {
            id: shipment.id,
            address_id: shipment.address_id,
            quantity: shipment.quantity,
            cost: shipment.cost,
            status: shipment.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order: OrderView,
    pub tickets: Vec<TicketView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipment: Option<ShipmentView>,
}

impl From<SettlementReceipt> for CheckoutResponse {
    fn from(receipt: SettlementReceipt) -> Self {
        Self {
            order: OrderView {
                id: receipt.order.id,
                total: receipt.order.total,
                status: receipt.order.status,
                currency: receipt.order.currency,
            },
            tickets: receipt.tickets.into_iter().map(TicketView::from).collect(),
            shipment: receipt.shipment.map(ShipmentView::from),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteLineView {
    pub flight_id: i64,
    pub seat_id: i64,
    pub baggage_id: Option<i64>,
    pub passenger_count: u32,
    pub unit_price: i64,
    pub subtotal: i64,
}

impl From<PricedLine> for QuoteLineView {
    fn from(line: PricedLine) -> Self {
        Self {
            flight_id: line.flight_id,
            seat_id: line.seat_id,
            baggage_id: line.baggage_id,
            passenger_count: line.passenger_count,
            unit_price: line.unit_price,
            subtotal: line.subtotal,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub lines: Vec<QuoteLineView>,
    pub tickets_total: i64,
    pub shipment_cost: i64,
    pub total: i64,
    pub currency: String,
}

impl From<Quote> for QuoteResponse {
    fn from(quote: Quote) -> Self {
        Self {
            lines: quote.lines.into_iter().map(QuoteLineView::from).collect(),
            tickets_total: quote.tickets_total,
            shipment_cost: quote.shipment_cost,
            total: quote.total,
            currency: quote.currency,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| AppError::Validation("Idempotency-Key must be visible ASCII".into()))
        })
        .transpose()
}

/// POST /v1/cart/checkout
pub async fn checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    headers: HeaderMap,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Envelope<CheckoutResponse>, AppError> {
    let Json(body) = payload?;

    let user_id = claims.user_id()?;
    if body.user_id != user_id {
        return Err(AppError::Unauthorized(
            "userId does not match the authenticated user".into(),
        ));
    }

    let request = SettlementRequest {
        user_id,
        payment_method_ref: body.payment_method_ref,
        items: body.items,
        shipment: body.shipment,
        idempotency_key: idempotency_key(&headers)?,
    };

    let started = Instant::now();
    let result = state.settlement.settle(request).await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.kind().as_str(),
    };
    state.metrics.record(outcome, started.elapsed().as_secs_f64());

    let receipt = result?;
    Ok(Envelope(CheckoutResponse::from(receipt)))
}

/// POST /v1/cart/quote
pub async fn quote(
    State(state): State<AppState>,
    payload: Result<Json<QuoteRequest>, JsonRejection>,
) -> Result<Envelope<QuoteResponse>, AppError> {
    let Json(body) = payload?;

    let quote = state
        .settlement
        .quote(&body.items, body.shipment.as_ref())
        .await?;

    Ok(Envelope(QuoteResponse::from(quote)))
}
