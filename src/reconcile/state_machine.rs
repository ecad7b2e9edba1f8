//! The order lifecycle state machine.
//!
//! Pure transition logic: given the current status and an event, decide the
//! resulting transition or reject it. All persistence and ordering concerns
//! live in the engine; this module never touches the database.

use crate::models::OrderStatus;

/// A status-affecting event, reduced to what the transition rules need.
#[derive(Debug, Clone, Copy)]
pub enum OrderEvent {
    /// `payment.authorized`
    Authorize,
    /// `payment.captured`; `amount` is the captured amount in minor units.
    Capture { amount: i64 },
    /// `payment.failed`
    Fail,
    /// `refund.processed`; `cumulative` includes this refund's amount.
    Refund { cumulative: i64 },
    /// Internal fulfillment completion signal.
    Fulfill,
    /// Internal cancellation of an unpaid order.
    Cancel,
}

impl OrderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Capture { .. } => "capture",
            Self::Fail => "fail",
            Self::Refund { .. } => "refund",
            Self::Fulfill => "fulfill",
            Self::Cancel => "cancel",
        }
    }
}

/// Result of a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Order moves to a new status.
    To(OrderStatus),
    /// Partial refund recorded in the ledger; status unchanged.
    Ledger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The transition is not defined for the current status.
    Illegal {
        from: OrderStatus,
        event: &'static str,
    },
    /// Capture amount does not match the order amount exactly.
    AmountMismatch { expected: i64, actual: i64 },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Illegal { from, event } => {
                write!(f, "illegal transition: {} from status {}", event, from)
            }
            Self::AmountMismatch { expected, actual } => {
                write!(f, "capture amount {} does not match order amount {}", actual, expected)
            }
        }
    }
}

/// Decide the transition for `event` against an order in `status` with
/// `order_amount` in minor units.
///
/// A rejected event never mutates state; the engine decides whether a
/// rejection is a stale no-op (older gateway timestamp) or an anomaly.
pub fn apply(
    status: OrderStatus,
    order_amount: i64,
    event: OrderEvent,
) -> Result<Transition, TransitionError> {
    use OrderStatus::*;

    match event {
        OrderEvent::Authorize => match status {
            Created => Ok(Transition::To(Authorized)),
            _ => Err(illegal(status, event)),
        },

        OrderEvent::Capture { amount } => match status {
            // Capture implies authorization, so an early-arriving capture
            // lands directly from Created.
            Created | Authorized => {
                if amount != order_amount {
                    Err(TransitionError::AmountMismatch {
                        expected: order_amount,
                        actual: amount,
                    })
                } else {
                    Ok(Transition::To(Captured))
                }
            }
            _ => Err(illegal(status, event)),
        },

        // Captured orders cannot retroactively fail.
        OrderEvent::Fail => match status {
            Created | Authorized => Ok(Transition::To(Failed)),
            _ => Err(illegal(status, event)),
        },

        OrderEvent::Refund { cumulative } => match status {
            Captured | Fulfilled => {
                if cumulative > order_amount {
                    Err(illegal(status, event))
                } else if cumulative == order_amount {
                    Ok(Transition::To(Refunded))
                } else {
                    Ok(Transition::Ledger)
                }
            }
            _ => Err(illegal(status, event)),
        },

        OrderEvent::Fulfill => match status {
            Captured => Ok(Transition::To(Fulfilled)),
            _ => Err(illegal(status, event)),
        },

        OrderEvent::Cancel => match status {
            Created | Authorized => Ok(Transition::To(Cancelled)),
            _ => Err(illegal(status, event)),
        },
    }
}

fn illegal(from: OrderStatus, event: OrderEvent) -> TransitionError {
    TransitionError::Illegal {
        from,
        event: event.name(),
    }
}
