use axum::{
    extract::{rejection::PathRejection, Path, State},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use skyfare_core::models::{OrderDetail, OrderStatus, OrderSummary, Payment, PaymentStatus};
use skyfare_core::SettlementError;
use uuid::Uuid;

use crate::checkout::{ShipmentView, TicketView};
use crate::error::{AppError, Envelope};
use crate::middleware::CustomerClaims;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummaryView {
    pub id: i64,
    pub total: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl From<OrderSummary> for OrderSummaryView {
    fn from(order: OrderSummary) -> Self {
        Self {
            id: order.id,
            total: order.total,
            currency: order.currency,
            status: order.status,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub id: i64,
    pub amount: i64,
    pub status: PaymentStatus,
    pub authorization_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Payment> for PaymentView {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            amount: payment.amount,
            status: payment.status,
            authorization_ref: payment.authorization_ref,
            created_at: payment.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailView {
    pub id: i64,
    pub total: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tickets: Vec<TicketView>,
    pub payment: Option<PaymentView>,
    pub shipment: Option<ShipmentView>,
}

impl From<OrderDetail> for OrderDetailView {
    fn from(detail: OrderDetail) -> Self {
        Self {
            id: detail.order.id,
            total: detail.order.total,
            currency: detail.order.currency,
            status: detail.order.status,
            created_at: detail.order.created_at,
            updated_at: detail.order.updated_at,
            tickets: detail.tickets.into_iter().map(TicketView::from).collect(),
            payment: detail.payment.map(PaymentView::from),
            shipment: detail.shipment.map(ShipmentView::from),
        }
    }
}

/// GET /v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
) -> Result<Envelope<Vec<OrderSummaryView>>, AppError> {
    let user_id = claims.user_id()?;

    let orders = state
        .orders
        .list_orders(user_id)
        .await
        .map_err(|e| SettlementError::storage(Uuid::new_v4(), e))?;

    Ok(Envelope(orders.into_iter().map(OrderSummaryView::from).collect()))
}

/// GET /v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    order_id: Result<Path<i64>, PathRejection>,
) -> Result<Envelope<OrderDetailView>, AppError> {
    let Path(order_id) = order_id?;
    let user_id = claims.user_id()?;

    let detail = state
        .orders
        .get_order(user_id, order_id)
        .await
        .map_err(|e| SettlementError::storage(Uuid::new_v4(), e))?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;

    Ok(Envelope(OrderDetailView::from(detail)))
}
