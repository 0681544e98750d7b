//! Hand-off of saved messages to delivery.

pub mod worker;

use std::sync::Arc;

use crate::error::{PostmanError, QueueError};
use crate::lifecycle::MessageLifecycle;

pub use worker::{AutoRetry, DeliveryResult, WorkerQueue};

/// Accepts message ids for delivery.
pub trait DeliveryQueue: Send + Sync {
    fn enqueue(&self, message_id: i64) -> Result<(), QueueError>;
}

/// Delivers on the calling thread as soon as a message is enqueued.
///
/// `scheduled_at` is ignored.
pub struct ImmediateQueue {
    lifecycle: Arc<MessageLifecycle>,
}

impl ImmediateQueue {
    pub fn new(lifecycle: Arc<MessageLifecycle>) -> Self {
        Self { lifecycle }
    }
}

impl DeliveryQueue for ImmediateQueue {
    fn enqueue(&self, message_id: i64) -> Result<(), QueueError> {
        match self.lifecycle.send_by_id(message_id) {
            Ok(sent) => {
                log::debug!("Message {} dispatched (sent: {})", message_id, sent);
                Ok(())
            }
            Err(PostmanError::Queue(e)) => Err(e),
            Err(e) => Err(QueueError::DispatchFailed {
                message_id,
                reason: e.to_string(),
            }),
        }
    }
}
