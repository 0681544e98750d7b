//! SMTP delivery over lettre.

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MessageBuilder, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::Transport;
use secrecy::ExposeSecret;

use super::{MailFrom, MailTransport, OutgoingMail};
use crate::config::{SmtpConfig, SmtpTls};
use crate::error::TransportError;
use crate::message::Mailboxes;
use crate::secrets::SecretSource;

pub struct SmtpTransport {
    mailer: lettre::SmtpTransport,
    host: String,
}

impl SmtpTransport {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, TransportError> {
        let password = SecretSource::smtp_password(config)
            .resolve_optional()
            .map_err(|e| TransportError::NotConfigured(e.to_string()))?;

        let mut builder = lettre::SmtpTransport::builder_dangerous(config.host.as_str())
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let Some(username) = &config.username {
            let password = password
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        let tls = match config.tls {
            SmtpTls::None => Tls::None,
            SmtpTls::Starttls => Tls::Required(tls_parameters(&config.host)?),
            SmtpTls::Wrapper => Tls::Wrapper(tls_parameters(&config.host)?),
        };

        log::info!(
            "SMTP transport configured for {}:{} ({:?})",
            config.host,
            config.port,
            config.tls
        );

        Ok(Self {
            mailer: builder.tls(tls).build(),
            host: config.host.clone(),
        })
    }
}

fn tls_parameters(host: &str) -> Result<TlsParameters, TransportError> {
    TlsParameters::new(host.to_string()).map_err(|e| TransportError::NotConfigured(e.to_string()))
}

fn mailbox(email: &str, name: Option<&str>) -> Result<Mailbox, TransportError> {
    let address = email
        .parse::<lettre::Address>()
        .map_err(|e| TransportError::InvalidAddress {
            address: email.to_string(),
            reason: e.to_string(),
        })?;
    Ok(Mailbox::new(name.map(str::to_string), address))
}

fn sender(from: &MailFrom) -> Result<Mailbox, TransportError> {
    mailbox(&from.email, from.name.as_deref())
}

fn add_mailboxes(
    mut builder: MessageBuilder,
    boxes: &Mailboxes,
    apply: fn(MessageBuilder, Mailbox) -> MessageBuilder,
) -> Result<MessageBuilder, TransportError> {
    for (email, name) in boxes.iter() {
        builder = apply(builder, mailbox(email, name)?);
    }
    Ok(builder)
}

fn content_type(value: &str) -> ContentType {
    ContentType::parse(value).unwrap_or(ContentType::TEXT_PLAIN)
}

/// Builds the MIME tree: mixed[alternative[text, related[html, inline..]], attachments..].
pub(crate) fn build_message(mail: &OutgoingMail) -> Result<lettre::Message, TransportError> {
    let mut builder = lettre::Message::builder()
        .from(sender(&mail.from)?)
        .subject(mail.subject.clone());

    builder = add_mailboxes(builder, &mail.reply_to, MessageBuilder::reply_to)?;
    builder = add_mailboxes(builder, &mail.to, MessageBuilder::to)?;
    builder = add_mailboxes(builder, &mail.cc, MessageBuilder::cc)?;
    builder = add_mailboxes(builder, &mail.bcc, MessageBuilder::bcc)?;

    let mut related = MultiPart::related().singlepart(SinglePart::html(mail.html.clone()));
    for resource in &mail.inline {
        related = related.singlepart(
            Attachment::new_inline(resource.content_id.clone())
                .body(resource.data.clone(), content_type(&resource.content_type)),
        );
    }

    let alternative = MultiPart::alternative()
        .singlepart(SinglePart::plain(mail.text.clone()))
        .multipart(related);

    let body = if mail.attachments.is_empty() {
        alternative
    } else {
        let mut mixed = MultiPart::mixed().multipart(alternative);
        for file in &mail.attachments {
            mixed = mixed.singlepart(
                Attachment::new(file.file_name.clone())
                    .body(file.data.clone(), content_type(&file.content_type)),
            );
        }
        mixed
    };

    builder
        .multipart(body)
        .map_err(|e| TransportError::Build(e.to_string()))
}

impl MailTransport for SmtpTransport {
    fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let message = build_message(mail)?;
        self.mailer
            .send(&message)
            .map_err(|e| TransportError::Delivery(e.to_string()))?;
        log::debug!("Message '{}' accepted by {}", mail.subject, self.host);
        Ok(())
    }

    // Connections are not pooled; each send closes its own session.
    fn stop(&self) {}
}
