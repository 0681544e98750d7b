//! Scheduling of retry attempts for failed messages.
//!
//! A retry is a fresh copy of the failed message pointing at the chain root
//! through `try_message_id`. A chain never holds more than `max_tries` live
//! attempts, the root included.

use std::str::FromStr;
use std::time::Duration;

use crate::broadcast::{DeliveryBroadcaster, DeliveryEvent, DeliveryPhase};
use crate::config::RetryConfig;
use crate::db::message_repo::{self, RetryInsert};
use crate::db::Database;
use crate::error::Result;
use crate::message::{now, ErrorKind, Field, FieldError, Message};
use crate::queue::DeliveryQueue;

#[derive(Debug, thiserror::Error)]
#[error("Invalid delay '{input}': {reason}")]
pub struct DelayParseError {
    pub input: String,
    pub reason: String,
}

/// A relative delay such as `"+5 minutes"`, `"90s"` or `"now"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DelaySpec(Duration);

impl DelaySpec {
    pub fn now() -> Self {
        Self(Duration::ZERO)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for DelaySpec {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

fn unit_seconds(unit: &str) -> Option<u64> {
    match unit {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Some(1),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3_600),
        "d" | "day" | "days" => Some(86_400),
        "w" | "week" | "weeks" => Some(604_800),
        _ => None,
    }
}

impl FromStr for DelaySpec {
    type Err = DelayParseError;

    /// Parses one or more `<number><unit>` components, optionally prefixed
    /// with `+`. A bare number is seconds.
    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let error = |reason: &str| DelayParseError {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let normalized = input.trim().to_ascii_lowercase();
        if normalized == "now" {
            return Ok(Self::now());
        }
        let mut rest = normalized
            .strip_prefix('+')
            .unwrap_or(normalized.as_str())
            .trim_start();
        if rest.is_empty() {
            return Err(error("empty delay"));
        }

        let mut total: u64 = 0;
        while !rest.is_empty() {
            let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            if digits == 0 {
                return Err(error("expected a number"));
            }
            let amount: u64 = rest[..digits].parse().map_err(|_| error("number out of range"))?;
            rest = rest[digits..].trim_start();

            let unit_len = rest
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            let factor = unit_seconds(unit).ok_or_else(|| error("unknown unit"))?;
            rest = rest[unit_len..].trim_start();

            total = amount
                .checked_mul(factor)
                .and_then(|secs| total.checked_add(secs))
                .ok_or_else(|| error("delay too large"))?;
        }

        Ok(Self::from_secs(total))
    }
}

/// Exponential backoff bounded by an attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt of a chain that already has `attempts`
    /// live members: `min(base * 2^(attempts - 1), max)`.
    pub fn delay_for(&self, attempts: u64) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32) as u32;
        let delay = self
            .base_delay
            .as_secs()
            .saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_secs(delay.min(self.max_delay.as_secs()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_tries: config.max_tries,
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }
}

pub struct RetryScheduler {
    db: Database,
    events: DeliveryBroadcaster,
}

impl RetryScheduler {
    pub fn new(db: Database, events: DeliveryBroadcaster) -> Self {
        Self { db, events }
    }

    fn chain_root(message: &mut Message) -> Option<i64> {
        let root = message.try_message_id.or(message.id);
        if root.is_none() {
            message.add_error(
                Field::Id,
                ErrorKind::ValidationFailed,
                "Message must be saved before it can be retried",
            );
        }
        root
    }

    /// Schedules a copy of `message` to be sent after `delay`.
    ///
    /// Returns whether `message` is free of errors afterwards. A message that
    /// already carries a send failure yields `false` even when the retry was
    /// scheduled. Hitting `max_tries` or an invalid copy adds an error.
    pub fn repeat_after(
        &self,
        message: &mut Message,
        max_tries: u32,
        delay: DelaySpec,
        queue: &dyn DeliveryQueue,
    ) -> Result<bool> {
        let Some(root) = Self::chain_root(message) else {
            return Ok(false);
        };

        let mut retry = Message::new(
            message.subject.clone(),
            message.content_text.clone(),
            message.content_html.clone(),
        );
        retry.set_address_raw(message.address().map(str::to_string));
        retry.try_message_id = Some(root);
        let created_at = now();
        let delay_secs = i64::try_from(delay.as_duration().as_secs()).unwrap_or(i64::MAX);
        retry.scheduled_at = Some(created_at.saturating_add(delay_secs));

        if !retry.validate() {
            for error in retry.errors() {
                message.push_error(FieldError {
                    field: Field::Id,
                    ..error.clone()
                });
            }
            return Ok(false);
        }

        let mut row = retry.to_row();
        row.created_at = created_at;

        match message_repo::insert_retry(&self.db, root, max_tries, &row, message.id)? {
            RetryInsert::LimitReached(count) => {
                message.add_error(
                    Field::TryMessageId,
                    ErrorKind::RetryLimitExceeded,
                    format!("Retry limit reached: {} of {} attempts used", count, max_tries),
                );
                self.events.send(DeliveryEvent::new(
                    Some(root),
                    message.code(),
                    DeliveryPhase::RetryLimitReached,
                ));
                log::warn!("Retry chain {} exhausted after {} attempts", root, count);
            }
            RetryInsert::Inserted(id) => {
                retry.mark_inserted(id, created_at);
                queue.enqueue(id)?;
                self.events.send(DeliveryEvent::new(
                    Some(id),
                    retry.code(),
                    DeliveryPhase::RetryScheduled,
                ));
                log::info!(
                    "Retry {} of chain {} scheduled in {}s",
                    retry.code(),
                    root,
                    delay_secs
                );
            }
        }

        Ok(!message.has_errors())
    }

    /// Schedules a retry with the policy's backoff for the current chain size.
    pub fn repeat_with_policy(
        &self,
        message: &mut Message,
        policy: &RetryPolicy,
        queue: &dyn DeliveryQueue,
    ) -> Result<bool> {
        let Some(root) = message.try_message_id.or(message.id) else {
            return self.repeat_after(message, policy.max_tries, DelaySpec::now(), queue);
        };
        let attempts = message_repo::count_chain(&self.db, root)?;
        let delay = DelaySpec::from(policy.delay_for(attempts));
        self.repeat_after(message, policy.max_tries, delay, queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::QueueError;

    #[derive(Default)]
    struct RecordingQueue(Mutex<Vec<i64>>);

    impl DeliveryQueue for RecordingQueue {
        fn enqueue(&self, message_id: i64) -> std::result::Result<(), QueueError> {
            self.0.lock().unwrap().push(message_id);
            Ok(())
        }
    }

    fn saved_message(db: &Database) -> Message {
        let mut msg = Message::new("Invoice", "text", "<p>html</p>");
        msg.add_to("a@example.com", None);
        assert!(msg.save(db).unwrap());
        msg
    }

    #[test]
    fn test_parse_delays() {
        let secs = |s: &str| s.parse::<DelaySpec>().unwrap().as_duration().as_secs();
        assert_eq!(secs("now"), 0);
        assert_eq!(secs("+5 minutes"), 300);
        assert_eq!(secs("30 seconds"), 30);
        assert_eq!(secs("1 hour"), 3600);
        assert_eq!(secs("2h"), 7200);
        assert_eq!(secs("90s"), 90);
        assert_eq!(secs("1 hour 30 min"), 5400);
        assert_eq!(secs("45"), 45);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "+", "soon", "5 fortnights", "-5 minutes"] {
            assert!(input.parse::<DelaySpec>().is_err(), "{input}");
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_tries: 10,
            base_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(1000),
        };
        assert_eq!(policy.delay_for(1).as_secs(), 300);
        assert_eq!(policy.delay_for(2).as_secs(), 600);
        assert_eq!(policy.delay_for(3).as_secs(), 1000);
        assert_eq!(policy.delay_for(200).as_secs(), 1000);
    }

    #[test]
    fn test_repeat_after_creates_chain_member() {
        let db = Database::open_in_memory().unwrap();
        let scheduler = RetryScheduler::new(db.clone(), DeliveryBroadcaster::default());
        let queue = RecordingQueue::default();
        let mut msg = saved_message(&db);

        let before = now();
        assert!(scheduler
            .repeat_after(&mut msg, 3, "+5 minutes".parse().unwrap(), &queue)
            .unwrap());

        let queued = queue.0.lock().unwrap().clone();
        assert_eq!(queued.len(), 1);
        let retry = Message::load(&db, queued[0]).unwrap().unwrap();
        assert_eq!(retry.try_message_id, msg.id);
        assert_eq!(retry.subject, "Invoice");
        assert_eq!(retry.address(), msg.address());
        assert_ne!(retry.code(), msg.code());
        assert!(retry.scheduled_at.unwrap() >= before + 300);
        assert!(retry.sent_at.is_none());
    }

    #[test]
    fn test_chain_is_bounded_by_max_tries() {
        let db = Database::open_in_memory().unwrap();
        let scheduler = RetryScheduler::new(db.clone(), DeliveryBroadcaster::default());
        let queue = RecordingQueue::default();
        let mut root = saved_message(&db);

        assert!(scheduler.repeat_after(&mut root, 3, DelaySpec::now(), &queue).unwrap());
        let mut retry = Message::load(&db, queue.0.lock().unwrap()[0]).unwrap().unwrap();
        assert!(scheduler.repeat_after(&mut retry, 3, DelaySpec::now(), &queue).unwrap());

        assert!(!scheduler.repeat_after(&mut retry, 3, DelaySpec::now(), &queue).unwrap());
        assert!(retry.has_error_kind(ErrorKind::RetryLimitExceeded));
        assert_eq!(retry.errors()[0].field, Field::TryMessageId);
        assert_eq!(message_repo::count_chain(&db, root.id.unwrap()).unwrap(), 3);
        assert_eq!(queue.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_message_reports_false_but_still_retries() {
        let db = Database::open_in_memory().unwrap();
        let scheduler = RetryScheduler::new(db.clone(), DeliveryBroadcaster::default());
        let queue = RecordingQueue::default();
        let mut msg = saved_message(&db);
        msg.add_error(Field::SentAt, ErrorKind::FailedToSend, "connection refused");

        assert!(!scheduler.repeat_after(&mut msg, 3, DelaySpec::now(), &queue).unwrap());
        assert_eq!(queue.0.lock().unwrap().len(), 1);
        assert_eq!(msg.errors().len(), 1);
        assert_eq!(message_repo::count_chain(&db, msg.id.unwrap()).unwrap(), 2);
    }

    #[test]
    fn test_invalid_copy_errors_move_to_id() {
        let db = Database::open_in_memory().unwrap();
        let scheduler = RetryScheduler::new(db.clone(), DeliveryBroadcaster::default());
        let queue = RecordingQueue::default();
        let mut msg = saved_message(&db);
        msg.subject = String::new();

        assert!(!scheduler.repeat_after(&mut msg, 3, DelaySpec::now(), &queue).unwrap());
        assert_eq!(msg.errors()[0].field, Field::Id);
        assert_eq!(msg.errors()[0].kind, ErrorKind::ValidationFailed);
        assert!(queue.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsaved_message_cannot_be_retried() {
        let db = Database::open_in_memory().unwrap();
        let scheduler = RetryScheduler::new(db, DeliveryBroadcaster::default());
        let mut msg = Message::new("s", "", "");
        assert!(!scheduler
            .repeat_after(&mut msg, 3, DelaySpec::now(), &RecordingQueue::default())
            .unwrap());
        assert_eq!(msg.errors()[0].field, Field::Id);
    }

    #[test]
    fn test_repeat_with_policy_uses_backoff() {
        let db = Database::open_in_memory().unwrap();
        let scheduler = RetryScheduler::new(db.clone(), DeliveryBroadcaster::default());
        let queue = RecordingQueue::default();
        let mut msg = saved_message(&db);
        let policy = RetryPolicy {
            max_tries: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
        };

        let before = now();
        assert!(scheduler.repeat_with_policy(&mut msg, &policy, &queue).unwrap());
        let retry = Message::load(&db, queue.0.lock().unwrap()[0]).unwrap().unwrap();
        let delay = retry.scheduled_at.unwrap() - before;
        assert!((60..=61).contains(&delay), "delay was {delay}");
    }
}
