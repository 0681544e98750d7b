//! Execution of a single send attempt.
//!
//! A message moves from created to executing, then to sent or failed. The
//! outcome is persisted on the message row; failures are never retried
//! here (see [`crate::retry`]).

use std::sync::Arc;

use crate::broadcast::{DeliveryBroadcaster, DeliveryEvent, DeliveryPhase};
use crate::config::{PostmanConfig, Sender};
use crate::db::{attachment_repo, Database};
use crate::embed::EmbeddedResourceResolver;
use crate::error::{PostmanError, Result};
use crate::message::{now, AddressBook, ErrorKind, Field, FieldError, Message};
use crate::queue::DeliveryQueue;
use crate::transport::{MailFrom, MailTransport, OutgoingMail};
use crate::web_version::{WebVersionSigner, WEB_VERSION_MARKER};

const DEFAULT_SENDER_NAME: &str = "Postman";

pub struct MessageLifecycle {
    db: Database,
    config: Arc<PostmanConfig>,
    transport: Arc<dyn MailTransport>,
    signer: Arc<WebVersionSigner>,
    events: DeliveryBroadcaster,
}

impl MessageLifecycle {
    pub fn new(
        db: Database,
        config: Arc<PostmanConfig>,
        transport: Arc<dyn MailTransport>,
        signer: Arc<WebVersionSigner>,
    ) -> Self {
        Self {
            db,
            config,
            transport,
            signer,
            events: DeliveryBroadcaster::default(),
        }
    }

    pub fn with_events(mut self, events: DeliveryBroadcaster) -> Self {
        self.events = events;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn events(&self) -> &DeliveryBroadcaster {
        &self.events
    }

    fn emit(&self, message: &Message, phase: DeliveryPhase, error: Option<&str>) {
        let mut event = DeliveryEvent::new(message.id, message.code(), phase);
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.events.send(event);
    }

    /// Configured sender, or the SMTP user named "Postman". A plain sender
    /// string that is not a valid address falls back to the default.
    fn sender(&self) -> MailFrom {
        let fallback = || MailFrom {
            email: self.config.smtp_user.clone(),
            name: Some(DEFAULT_SENDER_NAME.to_string()),
        };

        match &self.config.from {
            Some(Sender::Email(email)) if email.parse::<lettre::Address>().is_ok() => MailFrom {
                email: email.clone(),
                name: None,
            },
            Some(Sender::Email(email)) => {
                log::warn!("Configured sender '{}' is not a valid address, using default", email);
                fallback()
            }
            Some(Sender::Mailbox { email, name }) => MailFrom {
                email: email.clone(),
                name: name.clone(),
            },
            None => fallback(),
        }
    }

    /// Records a delivery failure on the message and persists it.
    fn fail(&self, message: &mut Message, error: FieldError) -> Result<bool> {
        let text = error.message.clone();
        message.error = Some(text.clone());
        message.save(&self.db)?;
        // After saving: validation drops earlier ValidationFailed entries.
        message.push_error(error);
        self.emit(message, DeliveryPhase::Failed, Some(&text));
        log::warn!("Message {} failed: {}", message.code(), text);
        Ok(false)
    }

    /// Sends the message now, on the calling thread.
    ///
    /// Returns `Ok(false)` when validation, recipient expansion or the
    /// transport failed; the reason is recorded on the message.
    pub fn send_immediately(&self, message: &mut Message) -> Result<bool> {
        if message.is_sent() {
            log::debug!("Message {} already sent, skipping", message.code());
            return Ok(true);
        }

        message.clear_errors();
        message.executed_at = Some(now());

        if !message.save(&self.db)? {
            if message.has_error_kind(ErrorKind::ValidationFailed) {
                log::warn!("Message {} failed validation, not sending", message.code());
                return Ok(false);
            }
            // The stored row refused the update: it was sent concurrently.
            if let Some(stored) = message.id.map(|id| Message::load(&self.db, id)).transpose()? {
                if let Some(stored) = stored.filter(Message::is_sent) {
                    *message = stored;
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        self.emit(message, DeliveryPhase::Executing, None);
        log::info!("Sending message {} ({})", message.code(), message.subject);

        let recipients = match AddressBook::expand(message.address()) {
            Ok(recipients) => recipients,
            Err(error) => return self.fail(message, error),
        };

        let web_version = self.signer.url_for(message.code())?;

        let mut mail = OutgoingMail::new(self.sender(), message.subject.clone());
        mail.text = message.content_text.replace(WEB_VERSION_MARKER, &web_version);
        let html = message.content_html.replace(WEB_VERSION_MARKER, &web_version);

        let attachments = match message.id {
            Some(id) => attachment_repo::list_for_message(&self.db, id)?,
            None => Vec::new(),
        };
        mail.html = EmbeddedResourceResolver::resolve(&html, &attachments, &mut mail);

        mail.reply_to = recipients.reply_to;
        mail.to = recipients.to;
        mail.cc = recipients.cc;
        mail.bcc = recipients.bcc;

        if !mail.has_recipients() {
            return self.fail(
                message,
                FieldError::new(
                    Field::Address,
                    ErrorKind::NoRecipients,
                    "Message has no recipients",
                ),
            );
        }

        let result = self.transport.send(&mail);
        self.transport.stop();

        match result {
            Ok(()) => {
                message.sent_at = Some(now());
                message.error = None;
                message.save(&self.db)?;
                self.emit(message, DeliveryPhase::Sent, None);
                log::info!("Message {} sent", message.code());
                Ok(true)
            }
            Err(e) => self.fail(
                message,
                FieldError::new(
                    Field::SentAt,
                    ErrorKind::FailedToSend,
                    format!("Failed to send message: {}", e),
                ),
            ),
        }
    }

    /// Loads a message that has not been soft-deleted.
    pub fn load_live(&self, id: i64) -> Result<Message> {
        Message::load(&self.db, id)?
            .filter(|m| !m.is_deleted())
            .ok_or(PostmanError::MessageNotFound(id))
    }

    /// Loads a live message with its attachments and sends it.
    pub fn send_by_id(&self, id: i64) -> Result<bool> {
        let mut message = self.load_live(id)?;
        self.send_immediately(&mut message)
    }

    /// Validates and saves the message, then hands its id to the queue.
    ///
    /// Returns whether the message was saved.
    pub fn send_to_queue(&self, message: &mut Message, queue: &dyn DeliveryQueue) -> Result<bool> {
        if !message.save(&self.db)? {
            return Ok(false);
        }

        let Some(id) = message.id else {
            return Ok(false);
        };
        self.emit(message, DeliveryPhase::Queued, None);
        queue.enqueue(id)?;
        log::debug!("Message {} queued", message.code());
        Ok(true)
    }
}
