//! The reconciliation engine.
//!
//! Consumes verified, parsed webhook events and applies them to order and
//! subscription state. Every application runs in a single SQLite
//! transaction spanning the idempotency record, the status update, and any
//! payment/refund/anomaly rows, so a crash mid-processing rolls the whole
//! event back and the gateway's redelivery retries it from scratch.

pub mod state_machine;

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{
    AnomalyKind, EventRecord, OrderStatus, SubscriptionStatus, WebhookStatus,
};
use crate::payments::{
    parse_webhook_event, EventKind, InboundEvent, PaymentEntity, RefundEntity, SubscriptionEntity,
};
use state_machine::{apply as transition, OrderEvent, Transition, TransitionError};

/// Deliveries parked as pending are retried this many times (order-creation
/// retries and sweeper passes both count) before the event is failed and
/// queued for the operator.
pub const MAX_PENDING_ATTEMPTS: i64 = 5;

/// Observable result of applying one webhook event.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Event applied; the order now has this status.
    Applied { order_id: String, status: OrderStatus },
    /// Subscription lifecycle event applied.
    SubscriptionUpdated {
        subscription_id: String,
        status: SubscriptionStatus,
    },
    /// Event id already recorded; the stored outcome is returned without
    /// re-running any side effects.
    Duplicate {
        status: WebhookStatus,
        order_status: Option<OrderStatus>,
    },
    /// Conflicting event older than the order's last applied event; no-op.
    Stale { order_id: String, status: OrderStatus },
    /// Referenced order/payment/subscription not known yet; event parked
    /// for retry.
    Pending { attempts: i64 },
    /// Data-integrity anomaly recorded; existing state untouched.
    Anomaly {
        kind: AnomalyKind,
        order_id: Option<String>,
    },
    /// Event type irrelevant to reconciliation; recorded and acknowledged.
    Ignored,
}

/// Apply a verified event to the store.
///
/// The idempotency insert and all side effects share one transaction:
/// concurrent duplicate deliveries serialize on the `webhook_events`
/// primary key, and exactly one delivery observes the first-seen path.
pub fn apply_event(conn: &mut Connection, event: &InboundEvent) -> Result<ReconcileOutcome> {
    let tx = conn.transaction()?;

    let outcome = match queries::try_record_webhook_event(
        &tx,
        &event.event_id,
        &event.event_type,
        &event.raw,
        event.event_ts,
    )? {
        None => process_event(&tx, event)?,
        // A stored pending event has had no side effects applied, so a
        // redelivery is a legitimate retry rather than a duplicate.
        Some(existing) if existing.status == WebhookStatus::Pending => process_event(&tx, event)?,
        Some(existing) => ReconcileOutcome::Duplicate {
            status: existing.status,
            order_status: existing.outcome,
        },
    };

    tx.commit()?;
    Ok(outcome)
}

/// Re-attempt pending events that reference `order_id`, in gateway
/// timestamp order. Called after local order creation.
pub fn retry_pending_for_order(conn: &mut Connection, order_id: &str) -> Result<usize> {
    let records = queries::pending_events_for_order(conn, order_id)?;
    retry_records(conn, &records)
}

/// Sweep all pending events (bounded batch), re-attempting each. Events
/// exceeding the attempt budget are failed and flagged for the operator.
pub fn retry_pending_events(conn: &mut Connection, limit: i64) -> Result<usize> {
    let records = queries::pending_events(conn, limit)?;
    retry_records(conn, &records)
}

fn retry_records(conn: &mut Connection, records: &[EventRecord]) -> Result<usize> {
    let mut applied = 0;
    for record in records {
        match retry_event(conn, record)? {
            ReconcileOutcome::Applied { .. } | ReconcileOutcome::SubscriptionUpdated { .. } => {
                applied += 1;
            }
            _ => {}
        }
    }
    Ok(applied)
}

fn retry_event(conn: &mut Connection, record: &EventRecord) -> Result<ReconcileOutcome> {
    let event = match parse_webhook_event(record.payload.as_bytes(), Some(&record.id)) {
        Ok(e) => e,
        Err(e) => {
            // Stored payload is no longer parseable; fail it rather than
            // retrying forever.
            let tx = conn.transaction()?;
            queries::mark_event_failed(&tx, &record.id, record.order_ref.as_deref(), &e.to_string())?;
            tx.commit()?;
            return Ok(ReconcileOutcome::Ignored);
        }
    };

    let tx = conn.transaction()?;
    let outcome = process_event(&tx, &event)?;
    tx.commit()?;
    Ok(outcome)
}

/// Internal fulfillment completion signal: Captured -> Fulfilled.
pub fn fulfill_order(conn: &mut Connection, order_id: &str) -> Result<crate::models::Order> {
    apply_internal(conn, order_id, OrderEvent::Fulfill)
}

/// Internal cancellation of an unpaid order.
pub fn cancel_order(conn: &mut Connection, order_id: &str) -> Result<crate::models::Order> {
    apply_internal(conn, order_id, OrderEvent::Cancel)
}

fn apply_internal(
    conn: &mut Connection,
    order_id: &str,
    event: OrderEvent,
) -> Result<crate::models::Order> {
    let tx = conn.transaction()?;
    let order = queries::get_order(&tx, order_id)?
        .ok_or_else(|| crate::error::AppError::NotFound(format!("order not found: {}", order_id)))?;

    match transition(order.status, order.amount, event) {
        Ok(Transition::To(new_status)) => {
            queries::update_order_status(&tx, order_id, new_status, None, order.last_event_at)?;
            tx.commit()?;
            tracing::info!("order {}: {} -> {}", order_id, order.status, new_status);
            queries::get_order(conn, order_id)?.ok_or_else(|| {
                crate::error::AppError::Internal("order vanished after update".into())
            })
        }
        Ok(Transition::Ledger) => unreachable!("internal events never hit the refund ledger"),
        Err(e) => Err(crate::error::AppError::Conflict(e.to_string())),
    }
}

// ============ Event dispatch ============

fn process_event(tx: &Connection, event: &InboundEvent) -> Result<ReconcileOutcome> {
    match &event.kind {
        EventKind::PaymentAuthorized { payment } => {
            apply_payment_event(tx, event, payment, OrderEvent::Authorize)
        }
        EventKind::PaymentCaptured { payment } => apply_payment_event(
            tx,
            event,
            payment,
            OrderEvent::Capture {
                amount: payment.amount,
            },
        ),
        EventKind::PaymentFailed { payment } => {
            apply_payment_event(tx, event, payment, OrderEvent::Fail)
        }
        EventKind::RefundProcessed { refund } => apply_refund_event(tx, event, refund),
        EventKind::SubscriptionActivated { subscription } => {
            apply_subscription_event(tx, event, subscription, SubscriptionAction::Activate, None)
        }
        EventKind::SubscriptionCharged {
            subscription,
            payment,
        } => apply_subscription_event(
            tx,
            event,
            subscription,
            SubscriptionAction::Charge,
            payment.as_ref(),
        ),
        EventKind::SubscriptionPaused { subscription } => {
            apply_subscription_event(tx, event, subscription, SubscriptionAction::Pause, None)
        }
        EventKind::SubscriptionResumed { subscription } => {
            apply_subscription_event(tx, event, subscription, SubscriptionAction::Resume, None)
        }
        EventKind::SubscriptionCancelled { subscription } => {
            apply_subscription_event(tx, event, subscription, SubscriptionAction::Cancel, None)
        }
        EventKind::Ignored => {
            queries::mark_event_processed(tx, &event.event_id, None, None)?;
            tracing::debug!("ignored event type: {}", event.event_type);
            Ok(ReconcileOutcome::Ignored)
        }
    }
}

// ============ Payment events ============

fn apply_payment_event(
    tx: &Connection,
    event: &InboundEvent,
    payment: &PaymentEntity,
    action: OrderEvent,
) -> Result<ReconcileOutcome> {
    let Some(order_ref) = payment.order_id.as_deref() else {
        // A payment with no order reference can never be matched.
        let detail = format!("payment {} carries no order reference", payment.id);
        queries::mark_event_failed(tx, &event.event_id, None, &detail)?;
        queries::create_anomaly(tx, AnomalyKind::OrderNotFound, None, Some(&event.event_id), &detail)?;
        return Ok(ReconcileOutcome::Anomaly {
            kind: AnomalyKind::OrderNotFound,
            order_id: None,
        });
    };

    let Some(order) = queries::get_order(tx, order_ref)? else {
        return park_pending(
            tx,
            event,
            Some(order_ref),
            &format!("order {} not found", order_ref),
        );
    };

    // Audit trail: one immutable payment row per gateway payment id,
    // regardless of how the transition decision falls.
    let entity_json = payment_entity_json(event, &payment.id);
    queries::insert_payment(tx, &payment.id, &order.id, &entity_json)?;

    settle_transition(tx, event, &order, action)
}

/// Decide and persist a state-machine transition for an order-level event.
fn settle_transition(
    tx: &Connection,
    event: &InboundEvent,
    order: &crate::models::Order,
    action: OrderEvent,
) -> Result<ReconcileOutcome> {
    match transition(order.status, order.amount, action) {
        Ok(Transition::To(new_status)) => {
            let paid_at = (new_status == OrderStatus::Captured).then_some(event.event_ts);
            queries::update_order_status(tx, &order.id, new_status, paid_at, event.event_ts)?;
            queries::mark_event_processed(tx, &event.event_id, Some(&order.id), Some(new_status))?;
            tracing::info!(
                "order {}: {} -> {} ({})",
                order.id,
                order.status,
                new_status,
                event.event_type
            );
            Ok(ReconcileOutcome::Applied {
                order_id: order.id.clone(),
                status: new_status,
            })
        }
        Ok(Transition::Ledger) => {
            queries::mark_event_processed(tx, &event.event_id, Some(&order.id), Some(order.status))?;
            Ok(ReconcileOutcome::Applied {
                order_id: order.id.clone(),
                status: order.status,
            })
        }
        Err(TransitionError::AmountMismatch { expected, actual }) => {
            let detail = format!(
                "capture amount {} does not match order amount {} for order {}",
                actual, expected, order.id
            );
            queries::mark_event_failed(tx, &event.event_id, Some(&order.id), &detail)?;
            queries::create_anomaly(
                tx,
                AnomalyKind::AmountMismatch,
                Some(&order.id),
                Some(&event.event_id),
                &detail,
            )?;
            Ok(ReconcileOutcome::Anomaly {
                kind: AnomalyKind::AmountMismatch,
                order_id: Some(order.id.clone()),
            })
        }
        Err(err @ TransitionError::Illegal { .. }) => {
            if event.event_ts <= order.last_event_at {
                // Late delivery of an event the order has already moved
                // past - a no-op, not an anomaly.
                queries::mark_event_processed(
                    tx,
                    &event.event_id,
                    Some(&order.id),
                    Some(order.status),
                )?;
                tracing::debug!(
                    "stale event {} for order {} ignored (ts {} <= {})",
                    event.event_id,
                    order.id,
                    event.event_ts,
                    order.last_event_at
                );
                Ok(ReconcileOutcome::Stale {
                    order_id: order.id.clone(),
                    status: order.status,
                })
            } else {
                let detail = format!("{} (order {})", err, order.id);
                queries::mark_event_failed(tx, &event.event_id, Some(&order.id), &detail)?;
                queries::create_anomaly(
                    tx,
                    AnomalyKind::IllegalTransition,
                    Some(&order.id),
                    Some(&event.event_id),
                    &detail,
                )?;
                Ok(ReconcileOutcome::Anomaly {
                    kind: AnomalyKind::IllegalTransition,
                    order_id: Some(order.id.clone()),
                })
            }
        }
    }
}

// ============ Refund events ============

fn apply_refund_event(
    tx: &Connection,
    event: &InboundEvent,
    refund: &RefundEntity,
) -> Result<ReconcileOutcome> {
    // Refunds reference the payment they reverse; the payment row links us
    // to the order.
    let Some(payment) = queries::get_payment(tx, &refund.payment_id)? else {
        return park_pending(
            tx,
            event,
            None,
            &format!("payment {} not found for refund {}", refund.payment_id, refund.id),
        );
    };

    let order = queries::get_order(tx, &payment.order_id)?.ok_or_else(|| {
        crate::error::AppError::Internal(format!("payment {} references missing order", payment.id))
    })?;

    // A refund id already in the ledger (delivered under another event id)
    // must not double-count.
    if queries::refunds_for_order(tx, &order.id)?
        .iter()
        .any(|r| r.id == refund.id)
    {
        queries::mark_event_processed(tx, &event.event_id, Some(&order.id), Some(order.status))?;
        return Ok(ReconcileOutcome::Duplicate {
            status: WebhookStatus::Processed,
            order_status: Some(order.status),
        });
    }

    let cumulative = queries::total_refunded(tx, &order.id)? + refund.amount;
    match transition(order.status, order.amount, OrderEvent::Refund { cumulative }) {
        Ok(outcome) => {
            queries::insert_refund(tx, &refund.id, &order.id, Some(&refund.payment_id), refund.amount)?;
            let new_status = match outcome {
                Transition::To(status) => {
                    queries::update_order_status(tx, &order.id, status, None, event.event_ts)?;
                    status
                }
                Transition::Ledger => order.status,
            };
            queries::mark_event_processed(tx, &event.event_id, Some(&order.id), Some(new_status))?;
            tracing::info!(
                "order {}: refund {} for {} applied (status {})",
                order.id,
                refund.id,
                refund.amount,
                new_status
            );
            Ok(ReconcileOutcome::Applied {
                order_id: order.id.clone(),
                status: new_status,
            })
        }
        Err(err) => {
            if event.event_ts <= order.last_event_at
                && matches!(err, TransitionError::Illegal { .. })
                && order.status == OrderStatus::Refunded
            {
                // Refund events landing after the order already flipped to
                // refunded are stale duplicates of the same money movement.
                queries::mark_event_processed(tx, &event.event_id, Some(&order.id), Some(order.status))?;
                return Ok(ReconcileOutcome::Stale {
                    order_id: order.id.clone(),
                    status: order.status,
                });
            }
            let detail = format!("{} (refund {}, order {})", err, refund.id, order.id);
            queries::mark_event_failed(tx, &event.event_id, Some(&order.id), &detail)?;
            queries::create_anomaly(
                tx,
                AnomalyKind::IllegalTransition,
                Some(&order.id),
                Some(&event.event_id),
                &detail,
            )?;
            Ok(ReconcileOutcome::Anomaly {
                kind: AnomalyKind::IllegalTransition,
                order_id: Some(order.id.clone()),
            })
        }
    }
}

// ============ Subscription events ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionAction {
    Activate,
    Charge,
    Pause,
    Resume,
    Cancel,
}

fn apply_subscription_event(
    tx: &Connection,
    event: &InboundEvent,
    sub: &SubscriptionEntity,
    action: SubscriptionAction,
    payment: Option<&PaymentEntity>,
) -> Result<ReconcileOutcome> {
    use SubscriptionAction::*;
    use SubscriptionStatus::*;

    let existing = queries::get_subscription(tx, &sub.id)?;

    // Cancellation is terminal: any later lifecycle event is a conflict,
    // except a redundant cancel which is a harmless no-op.
    if let Some(ref record) = existing {
        if record.status == Cancelled {
            if action == Cancel {
                queries::mark_event_processed(tx, &event.event_id, None, None)?;
                return Ok(ReconcileOutcome::SubscriptionUpdated {
                    subscription_id: sub.id.clone(),
                    status: Cancelled,
                });
            }
            let detail = format!(
                "{} received for cancelled subscription {}",
                event.event_type, sub.id
            );
            queries::mark_event_failed(tx, &event.event_id, None, &detail)?;
            queries::create_anomaly(
                tx,
                AnomalyKind::SubscriptionConflict,
                None,
                Some(&event.event_id),
                &detail,
            )?;
            return Ok(ReconcileOutcome::Anomaly {
                kind: AnomalyKind::SubscriptionConflict,
                order_id: None,
            });
        }
    }

    let status = match (action, &existing) {
        (Activate, None) => {
            queries::insert_subscription(
                tx,
                &sub.id,
                sub.customer_id.as_deref(),
                &sub.plan_id,
                sub.current_start,
                sub.current_end,
            )?;
            tracing::info!("subscription {} activated (plan {})", sub.id, sub.plan_id);
            Active
        }
        // Redelivered activation under a fresh event id - idempotent.
        (Activate, Some(record)) => record.status,

        (Charge, _) => {
            if existing.is_none() {
                // The activation event was missed; the charge carries
                // enough to reconstruct the subscription.
                queries::insert_subscription(
                    tx,
                    &sub.id,
                    sub.customer_id.as_deref(),
                    &sub.plan_id,
                    sub.current_start,
                    sub.current_end,
                )?;
                tracing::warn!(
                    "subscription {} created from charge event (activation not seen)",
                    sub.id
                );
            } else {
                queries::renew_subscription(tx, &sub.id, sub.current_start, sub.current_end)?;
                if existing.as_ref().map(|r| r.status) == Some(Paused) {
                    queries::update_subscription_status(tx, &sub.id, Active)?;
                }
            }

            // Reconcile the gateway-side order this charge settles. This is
            // the one flow where the gateway legitimately precedes local
            // order creation, so an unknown order becomes a shadow order.
            if let Some(payment) = payment {
                if let Some(order_ref) = payment.order_id.as_deref() {
                    match queries::get_order(tx, order_ref)? {
                        Some(order) => {
                            let entity_json = payment_entity_json(event, &payment.id);
                            queries::insert_payment(tx, &payment.id, &order.id, &entity_json)?;
                            settle_transition(
                                tx,
                                event,
                                &order,
                                OrderEvent::Capture {
                                    amount: payment.amount,
                                },
                            )?;
                        }
                        None => {
                            let order = queries::create_shadow_order(
                                tx,
                                order_ref,
                                payment.amount,
                                &payment.currency,
                                event.event_ts,
                            )?;
                            let entity_json = payment_entity_json(event, &payment.id);
                            queries::insert_payment(tx, &payment.id, &order.id, &entity_json)?;
                            tracing::info!(
                                "shadow order {} created for subscription charge {}",
                                order.id,
                                sub.id
                            );
                        }
                    }
                }
            }
            Active
        }

        (Pause, Some(record)) if record.status == Active => {
            queries::update_subscription_status(tx, &sub.id, Paused)?;
            Paused
        }
        (Pause, Some(record)) => record.status,
        (Resume, Some(record)) if record.status == Paused => {
            queries::update_subscription_status(tx, &sub.id, Active)?;
            Active
        }
        (Resume, Some(record)) => record.status,
        (Cancel, Some(_)) => {
            queries::update_subscription_status(tx, &sub.id, Cancelled)?;
            tracing::info!("subscription {} cancelled", sub.id);
            Cancelled
        }

        (Pause | Resume | Cancel, None) => {
            return park_pending(
                tx,
                event,
                None,
                &format!("subscription {} not found", sub.id),
            );
        }
    };

    queries::mark_event_processed(tx, &event.event_id, None, None)?;
    Ok(ReconcileOutcome::SubscriptionUpdated {
        subscription_id: sub.id.clone(),
        status,
    })
}

// ============ Helpers ============

/// Park an event as pending, failing it once the attempt budget is spent.
fn park_pending(
    tx: &Connection,
    event: &InboundEvent,
    reference: Option<&str>,
    reason: &str,
) -> Result<ReconcileOutcome> {
    let attempts = queries::mark_event_pending(tx, &event.event_id, reference, reason)?;
    if attempts >= MAX_PENDING_ATTEMPTS {
        queries::mark_event_failed(tx, &event.event_id, reference, reason)?;
        queries::create_anomaly(
            tx,
            AnomalyKind::OrderNotFound,
            reference,
            Some(&event.event_id),
            &format!("{} after {} attempts", reason, attempts),
        )?;
        return Ok(ReconcileOutcome::Anomaly {
            kind: AnomalyKind::OrderNotFound,
            order_id: reference.map(str::to_string),
        });
    }
    tracing::debug!(
        "event {} parked pending (attempt {}): {}",
        event.event_id,
        attempts,
        reason
    );
    Ok(ReconcileOutcome::Pending { attempts })
}

/// Extract the payment entity from the raw envelope for the audit row,
/// falling back to the whole body if the structure is surprising.
fn payment_entity_json(event: &InboundEvent, payment_id: &str) -> String {
    serde_json::from_str::<serde_json::Value>(&event.raw)
        .ok()
        .and_then(|v| v.pointer("/payload/payment/entity").cloned())
        .filter(|entity| entity.get("id").and_then(|id| id.as_str()) == Some(payment_id))
        .map(|entity| entity.to_string())
        .unwrap_or_else(|| event.raw.clone())
}
