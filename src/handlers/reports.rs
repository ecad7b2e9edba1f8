//! Read-only reporting endpoints.
//!
//! These run on the read-only pool and never touch the write path used by
//! reconciliation, so dashboards cannot block webhook processing.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{Anomaly, Order, Subscription};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reports/orders", get(list_orders))
        .route("/reports/anomalies", get(list_anomalies))
        .route("/reports/subscriptions", get(list_subscriptions))
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<Order>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse()
                .map_err(|_| AppError::BadRequest(format!("unknown order status: {}", s)))
        })
        .transpose()?;

    let conn = state.read.get()?;
    let orders = queries::list_orders(&conn, status, clamp_limit(query.limit))?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
pub struct AnomaliesQuery {
    #[serde(default)]
    pub include_reviewed: bool,
    pub limit: Option<i64>,
}

pub async fn list_anomalies(
    State(state): State<AppState>,
    Query(query): Query<AnomaliesQuery>,
) -> Result<Json<Vec<Anomaly>>> {
    let conn = state.read.get()?;
    let anomalies =
        queries::list_anomalies(&conn, query.include_reviewed, clamp_limit(query.limit))?;
    Ok(Json(anomalies))
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<SubscriptionsQuery>,
) -> Result<Json<Vec<Subscription>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse()
                .map_err(|_| AppError::BadRequest(format!("unknown subscription status: {}", s)))
        })
        .transpose()?;

    let conn = state.read.get()?;
    let subscriptions = queries::list_subscriptions(&conn, status, clamp_limit(query.limit))?;
    Ok(Json(subscriptions))
}
