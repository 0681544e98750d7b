//! Builds unsaved messages from raw content or stored templates.

pub mod placeholders;

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::config::PostmanConfig;
use crate::db::{template_repo, Database};
use crate::error::ComposeError;
use crate::layout::{LayoutResolver, LayoutTriplet, CONTENT_MARKER};
use crate::message::Message;

pub use placeholders::Placeholders;

static RE_BODY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<body[^>]*>").unwrap());

/// The authenticated account a message is composed on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub user_id: String,
    pub username: String,
}

/// Moves `<style>` rules into inline `style` attributes.
pub trait StyleInliner: Send + Sync {
    fn inline(&self, html: &str) -> String;
}

pub struct ContentComposer {
    config: Arc<PostmanConfig>,
    layouts: Arc<LayoutResolver>,
    inliner: Option<Arc<dyn StyleInliner>>,
    db: Option<Database>,
}

impl ContentComposer {
    pub fn new(config: Arc<PostmanConfig>, layouts: Arc<LayoutResolver>) -> Self {
        Self {
            config,
            layouts,
            inliner: None,
            db: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_inliner(mut self, inliner: Arc<dyn StyleInliner>) -> Self {
        self.inliner = Some(inliner);
        self
    }

    fn base_placeholders(&self, subject: &str, actor: Option<&ActorContext>) -> Placeholders {
        let domain = url::Url::parse(&self.config.host)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        let mut base = Placeholders::new();
        base.insert("{host}", self.config.host.clone())
            .insert("{domain}", domain)
            .insert("{appname}", self.config.app_name.clone())
            .insert("{subject}", subject)
            .insert("{user_id}", actor.map(|a| a.user_id.clone()).unwrap_or_default())
            .insert("{username}", actor.map(|a| a.username.clone()).unwrap_or_default());
        base
    }

    /// Renders subject and bodies into a new, unsaved message.
    #[allow(clippy::too_many_arguments)]
    pub fn compose(
        &self,
        subject: &str,
        content_text: &str,
        content_html: &str,
        placeholders: &Placeholders,
        styles: &str,
        use_layout: bool,
        actor: Option<&ActorContext>,
    ) -> Result<Message, ComposeError> {
        let mut styles = styles.to_string();
        let layout = if use_layout {
            let layout = self.layouts.resolve("")?;
            styles.push_str(&layout.css);
            layout
        } else {
            LayoutTriplet::identity()
        };

        let full_subject = format!(
            "{} {} {}",
            self.config.subject_prefix, subject, self.config.subject_suffix
        )
        .trim()
        .to_string();

        let mut all = self.base_placeholders(subject, actor);
        all.merge(placeholders);

        let text = all.apply(&layout.text.replace(CONTENT_MARKER, content_text));
        let mut html = all.apply(&layout.html.replace(CONTENT_MARKER, content_html));

        if !styles.is_empty() {
            html = inject_styles(&html, &styles);
        }

        if self.config.use_inliner {
            match &self.inliner {
                Some(inliner) => html = inliner.inline(&html),
                None => log::warn!("Style inlining is enabled but no inliner is configured"),
            }
        }

        Ok(Message::new(full_subject, text, html))
    }

    /// Renders a stored template and copies its default recipients.
    ///
    /// An empty or missing `subject` falls back to the template subject.
    pub fn create(
        &self,
        template_code: &str,
        placeholders: &Placeholders,
        subject: Option<&str>,
        actor: Option<&ActorContext>,
    ) -> Result<Message, ComposeError> {
        let template = match &self.db {
            Some(db) => template_repo::find_by_code(db, template_code)?,
            None => None,
        }
        .ok_or_else(|| ComposeError::TemplateNotFound(template_code.to_string()))?;

        let subject = match subject {
            Some(s) if !s.is_empty() => s,
            _ => template.subject.as_str(),
        };

        let mut message = self.compose(
            subject,
            template.content_text.as_deref().unwrap_or_default(),
            template.content_html.as_deref().unwrap_or_default(),
            placeholders,
            template.styles.as_deref().unwrap_or_default(),
            template.use_layout,
            actor,
        )?;
        message.set_address_raw(template.address.clone());

        log::debug!("Composed message {} from template '{}'", message.code(), template_code);
        Ok(message)
    }
}

/// Places a `<style>` block right after the first `<body>` tag, or in front
/// of the document when there is none.
fn inject_styles(html: &str, styles: &str) -> String {
    let block = format!("<style type=\"text/css\">{}</style>", styles);
    match RE_BODY_TAG.find(html) {
        Some(m) => format!("{}\n{}{}", &html[..m.end()], block, &html[m.end()..]),
        None => format!("{}{}", block, html),
    }
}
