//! Fire-and-forget outbound notifications.
//!
//! Applied transitions are announced to a configured webhook URL after the
//! reconciliation transaction commits - never inside it, so a slow or dead
//! listener cannot stall or roll back payment processing.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct OrderNotification {
    /// Gateway event type that caused the transition.
    pub event: String,
    pub order_id: String,
    pub status: String,
    pub timestamp: i64,
}

/// Spawn a background task that POSTs the notification as JSON. Failures
/// are logged and dropped; delivery is best-effort.
pub fn spawn_order_notification(
    client: reqwest::Client,
    url: Option<String>,
    notification: OrderNotification,
) {
    let Some(url) = url else { return };

    tokio::spawn(async move {
        match client.post(&url).json(&notification).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    "order notification rejected ({}): order={}, status={}",
                    response.status(),
                    notification.order_id,
                    notification.status
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    "order notification failed: order={}, error={}",
                    notification.order_id,
                    e
                );
            }
        }
    });
}
