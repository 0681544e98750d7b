//! Recipient lists and their expansion into typed mailboxes.

use serde::{Deserialize, Serialize};

use super::{ErrorKind, Field, FieldError};

/// Role of an address entry. Persisted as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AddressType {
    ReplyTo,
    To,
    Cc,
    Bcc,
}

impl From<AddressType> for u8 {
    fn from(kind: AddressType) -> Self {
        match kind {
            AddressType::ReplyTo => 1,
            AddressType::To => 2,
            AddressType::Cc => 3,
            AddressType::Bcc => 4,
        }
    }
}

impl TryFrom<u8> for AddressType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ReplyTo),
            2 => Ok(Self::To),
            3 => Ok(Self::Cc),
            4 => Ok(Self::Bcc),
            other => Err(format!("unknown address type {}", other)),
        }
    }
}

/// One entry of a message's address list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(rename = "type")]
    pub kind: AddressType,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Address {
    pub fn new(kind: AddressType, email: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            kind,
            email: email.into(),
            name: name.map(str::to_string),
        }
    }
}

/// Ordered mapping of email to optional display name.
///
/// Re-inserting an email keeps its first position and replaces the name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mailboxes(Vec<(String, Option<String>)>);

impl Mailboxes {
    pub fn insert(&mut self, email: String, name: Option<String>) {
        match self.0.iter_mut().find(|(existing, _)| *existing == email) {
            Some(entry) => entry.1 = name,
            None => self.0.push((email, name)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, email: &str) -> Option<&Option<String>> {
        self.0.iter().find(|(e, _)| e == email).map(|(_, n)| n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(e, n)| (e.as_str(), n.as_deref()))
    }
}

/// Recipients grouped by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    pub reply_to: Mailboxes,
    pub to: Mailboxes,
    pub cc: Mailboxes,
    pub bcc: Mailboxes,
}

impl Recipients {
    fn slot(&mut self, kind: AddressType) -> &mut Mailboxes {
        match kind {
            AddressType::ReplyTo => &mut self.reply_to,
            AddressType::To => &mut self.to,
            AddressType::Cc => &mut self.cc,
            AddressType::Bcc => &mut self.bcc,
        }
    }
}

/// Parses and expands serialized address lists.
pub struct AddressBook;

impl AddressBook {
    /// Decodes a serialized list. Empty input is an empty list.
    pub fn parse(serialized: &str) -> Result<Vec<Address>, FieldError> {
        if serialized.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(serialized).map_err(|e| {
            FieldError::new(
                Field::Address,
                ErrorKind::ValidationFailed,
                format!("Malformed address list: {}", e),
            )
        })
    }

    pub fn serialize(list: &[Address]) -> String {
        serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
    }

    /// Groups a serialized address list by role.
    ///
    /// An absent, empty, or zero-entry list is `NoRecipients`.
    pub fn expand(serialized: Option<&str>) -> Result<Recipients, FieldError> {
        let list = match serialized {
            Some(s) => Self::parse(s)?,
            None => Vec::new(),
        };

        if list.is_empty() {
            return Err(FieldError::new(
                Field::Address,
                ErrorKind::NoRecipients,
                "Message has no recipients",
            ));
        }

        let mut recipients = Recipients::default();
        for entry in list {
            recipients.slot(entry.kind).insert(entry.email, entry.name);
        }
        Ok(recipients)
    }
}
