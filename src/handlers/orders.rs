//! Order API: purchase-intent creation and the internal lifecycle hooks
//! (fulfillment, cancellation, operator-initiated refunds).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{CreateOrder, Order, Payment, Refund};
use crate::payments::{PaymentLink, RefundEntity};
use crate::reconcile;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/fulfill", post(fulfill_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/refund", post(request_refund))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(flatten)]
    pub order: CreateOrder,
    /// When set, a gateway payment link is created for this email.
    pub customer_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_link: Option<PaymentLink>,
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>)> {
    let mut conn = state.db.get()?;
    let order = queries::create_order(&conn, &req.order)?;

    // Webhooks may have beaten the order here; apply anything parked.
    match reconcile::retry_pending_for_order(&mut conn, &order.id) {
        Ok(0) => {}
        Ok(applied) => {
            tracing::info!("order {}: {} pending event(s) applied on creation", order.id, applied);
        }
        Err(e) => {
            tracing::warn!("order {}: pending event retry failed: {}", order.id, e);
        }
    }
    // Re-read: pending events may have already moved the order.
    let order = queries::get_order(&conn, &order.id)?
        .ok_or_else(|| AppError::Internal("order vanished after creation".into()))?;

    // Payment link creation is best-effort: the order exists either way and
    // the caller can re-request a link.
    let payment_link = match &req.customer_email {
        Some(email) => {
            let callback_url = format!("{}/orders/{}", state.base_url, order.id);
            match state
                .gateway
                .create_payment_link(&order, Some(email), &callback_url)
                .await
            {
                Ok(link) => Some(link),
                Err(e) => {
                    tracing::warn!("payment link creation failed for order {}: {}", order.id, e);
                    None
                }
            }
        }
        None => None,
    };

    tracing::info!("order created: {} ({} {})", order.id, order.amount, order.currency);

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order,
            payment_link,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub payments: Vec<Payment>,
    pub refunds: Vec<Refund>,
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderDetail>> {
    let conn = state.db.get()?;
    let order = queries::get_order(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("order not found: {}", id)))?;
    let payments = queries::payments_for_order(&conn, &id)?;
    let refunds = queries::refunds_for_order(&conn, &id)?;

    Ok(Json(OrderDetail {
        order,
        payments,
        refunds,
    }))
}

/// Fulfillment completion signal from the (out-of-scope) fulfillment
/// pipeline: Captured -> Fulfilled.
pub async fn fulfill_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>> {
    let mut conn = state.db.get()?;
    let order = reconcile::fulfill_order(&mut conn, &id)?;
    Ok(Json(order))
}

/// Cancel an unpaid order.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>> {
    let mut conn = state.db.get()?;
    let order = reconcile::cancel_order(&mut conn, &id)?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Amount in minor units; omit for a full refund.
    pub amount: Option<i64>,
}

/// Ask the gateway to refund an order's payment. The local state change
/// happens only when the resulting `refund.processed` webhook arrives.
pub async fn request_refund(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RefundRequest>,
) -> Result<(StatusCode, Json<RefundEntity>)> {
    let conn = state.db.get()?;
    let order = queries::get_order(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("order not found: {}", id)))?;

    if !order.status.is_settled() {
        return Err(AppError::Conflict(format!(
            "order {} is not captured, nothing to refund",
            order.id
        )));
    }

    let payment = queries::latest_payment_for_order(&conn, &id)?
        .ok_or_else(|| AppError::Conflict(format!("order {} has no recorded payment", id)))?;
    drop(conn);

    let refund = state.gateway.refund_payment(&payment.id, req.amount).await?;
    tracing::info!(
        "refund {} requested for order {} (payment {})",
        refund.id,
        id,
        payment.id
    );

    Ok((StatusCode::ACCEPTED, Json(refund)))
}
