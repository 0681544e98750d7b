//! Delivery event broadcaster for real-time message status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Step of the delivery lifecycle an event reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPhase {
    Queued,
    Executing,
    Sent,
    Failed,
    RetryScheduled,
    RetryLimitReached,
}

impl std::fmt::Display for DeliveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryPhase::Queued => write!(f, "Queued"),
            DeliveryPhase::Executing => write!(f, "Executing"),
            DeliveryPhase::Sent => write!(f, "Sent"),
            DeliveryPhase::Failed => write!(f, "Failed"),
            DeliveryPhase::RetryScheduled => write!(f, "Retry scheduled"),
            DeliveryPhase::RetryLimitReached => write!(f, "Retry limit reached"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEvent {
    pub message_id: Option<i64>,
    pub code: String,
    pub phase: DeliveryPhase,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryEvent {
    pub fn new(message_id: Option<i64>, code: &str, phase: DeliveryPhase) -> Self {
        Self {
            message_id,
            code: code.to_string(),
            phase,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Broadcaster for delivery events.
#[derive(Clone)]
pub struct DeliveryBroadcaster {
    sender: Arc<broadcast::Sender<DeliveryEvent>>,
}

impl DeliveryBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: DeliveryEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.sender.subscribe()
    }
}

impl Default for DeliveryBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = DeliveryBroadcaster::default();
        broadcaster.send(DeliveryEvent::new(Some(1), "abc", DeliveryPhase::Queued));
    }

    #[test]
    fn test_send_receive() {
        let broadcaster = DeliveryBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(DeliveryEvent::new(Some(7), "code", DeliveryPhase::Failed).with_error("boom"));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.message_id, Some(7));
        assert_eq!(received.phase, DeliveryPhase::Failed);
        assert_eq!(received.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_event_serialization() {
        let event = DeliveryEvent::new(Some(1), "c", DeliveryPhase::RetryScheduled);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"messageId\":1"));
        assert!(json.contains("\"phase\":\"retry_scheduled\""));
        assert!(!json.contains("error"));
    }
}
