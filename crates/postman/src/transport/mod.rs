//! Outgoing mail payloads and the transports that deliver them.

pub mod memory;
pub mod smtp;

use crate::error::TransportError;
use crate::message::Mailboxes;

pub use memory::MemoryTransport;
pub use smtp::SmtpTransport;

/// Sender mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailFrom {
    pub email: String,
    pub name: Option<String>,
}

/// A resource referenced from the html body through `cid:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineResource {
    /// Content-ID without angle brackets.
    pub content_id: String,
    pub content_type: String,
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A fully rendered email ready to hand to a [`MailTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub charset: String,
    pub from: MailFrom,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub reply_to: Mailboxes,
    pub to: Mailboxes,
    pub cc: Mailboxes,
    pub bcc: Mailboxes,
    pub inline: Vec<InlineResource>,
    pub attachments: Vec<FileAttachment>,
}

impl OutgoingMail {
    pub fn new(from: MailFrom, subject: impl Into<String>) -> Self {
        Self {
            charset: "UTF-8".to_string(),
            from,
            subject: subject.into(),
            text: String::new(),
            html: String::new(),
            reply_to: Mailboxes::default(),
            to: Mailboxes::default(),
            cc: Mailboxes::default(),
            bcc: Mailboxes::default(),
            inline: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Registers an inline resource and returns the `cid:` reference to use in html.
    pub fn embed(
        &mut self,
        data: Vec<u8>,
        content_type: impl Into<String>,
        file_name: Option<String>,
    ) -> String {
        let content_id = format!("{}@postman", uuid::Uuid::new_v4().simple());
        let reference = format!("cid:{}", content_id);
        self.inline.push(InlineResource {
            content_id,
            content_type: content_type.into(),
            file_name,
            data,
        });
        reference
    }

    pub fn attach(
        &mut self,
        data: Vec<u8>,
        content_type: impl Into<String>,
        file_name: impl Into<String>,
    ) {
        self.attachments.push(FileAttachment {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data,
        });
    }

    pub fn has_recipients(&self) -> bool {
        !(self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty())
    }
}

/// Delivers rendered mail.
pub trait MailTransport: Send + Sync {
    /// Sends one message, blocking until the server accepted or refused it.
    fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError>;

    /// Releases any open connection. Called after every send attempt.
    fn stop(&self) {}
}
