//! Builders for test configurations and templates.

#![allow(dead_code)]

use postman::config::{InlineLayout, LayoutFiles, LayoutVariant, PostmanConfig, RetryConfig};
use postman::db::template_repo::TemplateRow;

/// Builder for `PostmanConfig`.
pub struct ConfigBuilder {
    config: PostmanConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PostmanConfig {
                workers: 2,
                ..Default::default()
            },
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.config.host = host.to_string();
        self
    }

    pub fn app_name(mut self, name: &str) -> Self {
        self.config.app_name = name.to_string();
        self
    }

    pub fn subject_affixes(mut self, prefix: &str, suffix: &str) -> Self {
        self.config.subject_prefix = prefix.to_string();
        self.config.subject_suffix = suffix.to_string();
        self
    }

    pub fn default_layout(mut self, name: &str) -> Self {
        self.config.default_layout = name.to_string();
        self
    }

    /// Adds an inline layout variant.
    pub fn inline_layout(mut self, name: &str, text: &str, html: &str, css: &str) -> Self {
        self.config.layout_variants.insert(
            name.to_string(),
            LayoutVariant::Inline(InlineLayout {
                text: Some(text.to_string()),
                html: Some(html.to_string()),
                css: (!css.is_empty()).then(|| css.to_string()),
            }),
        );
        self
    }

    pub fn file_layout(mut self, name: &str, files: LayoutFiles) -> Self {
        self.config
            .layout_variants
            .insert(name.to_string(), LayoutVariant::Files { files });
        self
    }

    pub fn web_version_secret(mut self, secret: &str) -> Self {
        self.config.web_version.secret = Some(secret.to_string());
        self
    }

    pub fn retry(mut self, max_tries: u32, base_delay_secs: u64, max_delay_secs: u64) -> Self {
        self.config.retry = RetryConfig {
            max_tries,
            base_delay_secs,
            max_delay_secs,
        };
        self
    }

    pub fn build(self) -> PostmanConfig {
        self.config
    }
}

/// Builder for `TemplateRow`.
pub struct TemplateBuilder {
    row: TemplateRow,
}

impl TemplateBuilder {
    pub fn new(code: &str, subject: &str) -> Self {
        Self {
            row: TemplateRow {
                code: code.to_string(),
                subject: subject.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.row.content_text = Some(text.to_string());
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.row.content_html = Some(html.to_string());
        self
    }

    pub fn styles(mut self, styles: &str) -> Self {
        self.row.styles = Some(styles.to_string());
        self
    }

    pub fn without_layout(mut self) -> Self {
        self.row.use_layout = false;
        self
    }

    /// Default recipients as a serialized address list.
    pub fn address(mut self, serialized: &str) -> Self {
        self.row.address = Some(serialized.to_string());
        self
    }

    pub fn build(self) -> TemplateRow {
        self.row
    }
}
