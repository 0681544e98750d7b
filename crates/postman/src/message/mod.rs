//! The persisted message model and its field-level error list.

pub mod address;

use std::fmt;

use crate::db::message_repo::{self, MessageRow};
use crate::db::{Database, DatabaseError};

pub use address::{Address, AddressBook, AddressType, Mailboxes, Recipients};

/// Current UTC time as Unix seconds.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Failure categories recorded on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ValidationFailed,
    TemplateNotFound,
    InvalidLayoutConfig,
    NoRecipients,
    FailedToSend,
    RetryLimitExceeded,
}

/// Message attribute an error is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Code,
    Subject,
    Address,
    TryMessageId,
    SentAt,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Code => "code",
            Field::Subject => "subject",
            Field::Address => "address",
            Field::TryMessageId => "try_message_id",
            Field::SentAt => "sent_at",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: Field,
    pub kind: ErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn new(field: Field, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            field,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field.as_str(), self.message)
    }
}

/// Derived lifecycle state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pending,
    Scheduled,
    Executing,
    Sent,
    Failed,
    Deleted,
}

/// A rendered email, persisted in the `messages` table.
///
/// `id` stays `None` until the first save. `code` is generated once at
/// construction and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Option<i64>,
    code: String,
    pub subject: String,
    pub content_text: String,
    pub content_html: String,
    address: Option<String>,
    pub try_message_id: Option<i64>,
    pub error: Option<String>,
    created_at: Option<i64>,
    pub scheduled_at: Option<i64>,
    pub executed_at: Option<i64>,
    pub sent_at: Option<i64>,
    pub deleted_at: Option<i64>,
    errors: Vec<FieldError>,
}

impl Message {
    pub fn new(
        subject: impl Into<String>,
        content_text: impl Into<String>,
        content_html: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            code: uuid::Uuid::new_v4().simple().to_string(),
            subject: subject.into(),
            content_text: content_text.into(),
            content_html: content_html.into(),
            address: None,
            try_message_id: None,
            error: None,
            created_at: None,
            scheduled_at: None,
            executed_at: None,
            sent_at: None,
            deleted_at: None,
            errors: Vec::new(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn created_at(&self) -> Option<i64> {
        self.created_at
    }

    /// Serialized address list as stored.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn set_address_raw(&mut self, serialized: Option<String>) {
        self.address = serialized;
    }

    pub fn set_addresses(&mut self, list: &[Address]) {
        self.address = Some(AddressBook::serialize(list));
    }

    pub fn addresses(&self) -> Result<Vec<Address>, FieldError> {
        AddressBook::parse(self.address.as_deref().unwrap_or_default())
    }

    fn push_address(&mut self, entry: Address) -> &mut Self {
        let mut list = self.addresses().unwrap_or_default();
        list.push(entry);
        self.set_addresses(&list);
        self
    }

    pub fn add_reply_to(&mut self, email: &str, name: Option<&str>) -> &mut Self {
        self.push_address(Address::new(AddressType::ReplyTo, email, name))
    }

    pub fn add_to(&mut self, email: &str, name: Option<&str>) -> &mut Self {
        self.push_address(Address::new(AddressType::To, email, name))
    }

    pub fn add_cc(&mut self, email: &str, name: Option<&str>) -> &mut Self {
        self.push_address(Address::new(AddressType::Cc, email, name))
    }

    pub fn add_bcc(&mut self, email: &str, name: Option<&str>) -> &mut Self {
        self.push_address(Address::new(AddressType::Bcc, email, name))
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_error_kind(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    pub fn add_error(&mut self, field: Field, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, kind, message));
    }

    pub fn push_error(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn state(&self) -> MessageState {
        if self.deleted_at.is_some() {
            MessageState::Deleted
        } else if self.sent_at.is_some() {
            MessageState::Sent
        } else if self.error.is_some() {
            MessageState::Failed
        } else if self.executed_at.is_some() {
            MessageState::Executing
        } else if self.scheduled_at.is_some_and(|at| at > now()) {
            MessageState::Scheduled
        } else {
            MessageState::Pending
        }
    }

    /// Normalizes attributes and checks them.
    ///
    /// Replaces earlier `ValidationFailed` entries; other errors are kept.
    pub fn validate(&mut self) -> bool {
        self.errors.retain(|e| e.kind != ErrorKind::ValidationFailed);

        self.subject = clean_line(&self.subject);
        self.content_text = self.content_text.trim().to_string();
        self.content_html = self.content_html.trim().to_string();
        if let Some(error) = &self.error {
            self.error = Some(error.trim().to_string());
        }

        if self.subject.is_empty() {
            self.add_error(
                Field::Subject,
                ErrorKind::ValidationFailed,
                "Subject cannot be blank",
            );
        }
        if self.code.is_empty() {
            self.add_error(Field::Code, ErrorKind::ValidationFailed, "Code cannot be blank");
        }

        !self.has_error_kind(ErrorKind::ValidationFailed)
    }

    /// Validates and writes the message, inserting it on first save.
    ///
    /// Returns `false` when validation fails or the stored row is already
    /// sent and therefore immutable.
    pub fn save(&mut self, db: &Database) -> Result<bool, DatabaseError> {
        if !self.validate() {
            return Ok(false);
        }

        match self.id {
            None => {
                self.created_at.get_or_insert_with(now);
                let id = message_repo::insert(db, &self.to_row())?;
                self.id = Some(id);
                Ok(true)
            }
            Some(id) => {
                let updated = message_repo::update(db, &self.to_row())?;
                if !updated {
                    log::warn!("Message {} was not updated: missing or already sent", id);
                }
                Ok(updated)
            }
        }
    }

    pub fn load(db: &Database, id: i64) -> Result<Option<Self>, DatabaseError> {
        Ok(message_repo::find_by_id(db, id)?.map(Self::from_row))
    }

    pub fn load_by_code(db: &Database, code: &str) -> Result<Option<Self>, DatabaseError> {
        Ok(message_repo::find_by_code(db, code)?.map(Self::from_row))
    }

    /// Records the id and creation time assigned by an insert done elsewhere.
    pub(crate) fn mark_inserted(&mut self, id: i64, created_at: i64) {
        self.id = Some(id);
        self.created_at = Some(created_at);
    }

    pub(crate) fn to_row(&self) -> MessageRow {
        MessageRow {
            id: self.id.unwrap_or_default(),
            code: self.code.clone(),
            subject: self.subject.clone(),
            content_text: Some(self.content_text.clone()),
            content_html: Some(self.content_html.clone()),
            address: self.address.clone(),
            try_message_id: self.try_message_id,
            error: self.error.clone(),
            created_at: self.created_at.unwrap_or_else(now),
            scheduled_at: self.scheduled_at,
            executed_at: self.executed_at,
            sent_at: self.sent_at,
            deleted_at: self.deleted_at,
        }
    }

    pub(crate) fn from_row(row: MessageRow) -> Self {
        Self {
            id: Some(row.id),
            code: row.code,
            subject: row.subject,
            content_text: row.content_text.unwrap_or_default(),
            content_html: row.content_html.unwrap_or_default(),
            address: row.address,
            try_message_id: row.try_message_id,
            error: row.error,
            created_at: Some(row.created_at),
            scheduled_at: row.scheduled_at,
            executed_at: row.executed_at,
            sent_at: row.sent_at,
            deleted_at: row.deleted_at,
            errors: Vec::new(),
        }
    }
}

/// Trims and drops control characters from a single-line value.
fn clean_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}
