use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// System-wide mail settings injected into the composer, layout resolver and
/// lifecycle at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostmanConfig {
    #[serde(default)]
    pub subject_prefix: String,
    #[serde(default)]
    pub subject_suffix: String,
    /// Configured sender. Falls back to `(smtp_user, "Postman")`.
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default = "default_smtp_user")]
    pub smtp_user: String,
    /// Absolute URL of the application, used for `{host}` and `{domain}`.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_layout_name")]
    pub default_layout: String,
    #[serde(default)]
    pub layout_variants: HashMap<String, LayoutVariant>,
    #[serde(default)]
    pub use_inliner: bool,
    #[serde(default)]
    pub web_version: WebVersionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Database file. Defaults to `~/.postman/data/postman.db`.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

fn default_smtp_user() -> String {
    "postman@localhost".to_string()
}

fn default_host() -> String {
    "http://localhost".to_string()
}

fn default_app_name() -> String {
    "Postman".to_string()
}

fn default_layout_name() -> String {
    "default".to_string()
}

fn default_workers() -> usize {
    num_cpus::get()
}

impl Default for PostmanConfig {
    fn default() -> Self {
        Self {
            subject_prefix: String::new(),
            subject_suffix: String::new(),
            from: None,
            smtp_user: default_smtp_user(),
            host: default_host(),
            app_name: default_app_name(),
            default_layout: default_layout_name(),
            layout_variants: HashMap::new(),
            use_inliner: false,
            web_version: WebVersionConfig::default(),
            retry: RetryConfig::default(),
            workers: default_workers(),
            database: None,
            smtp: None,
        }
    }
}

impl PostmanConfig {
    /// Returns the configured database path or the default location.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

/// Sender address: either a bare email or an email with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sender {
    Email(String),
    Mailbox {
        email: String,
        #[serde(default)]
        name: Option<String>,
    },
}

/// A named layout as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayoutVariant {
    /// Text/html/css read from view files.
    Files { files: LayoutFiles },
    /// Text/html/css given inline.
    Inline(InlineLayout),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineLayout {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub css: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutFiles {
    #[serde(default)]
    pub text: Option<PathBuf>,
    #[serde(default)]
    pub html: Option<PathBuf>,
    #[serde(default)]
    pub css: Option<PathBuf>,
}

impl LayoutFiles {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.html.is_none() && self.css.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebVersionConfig {
    /// Base URL of the public letter page. Defaults to `host`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub secret_file: Option<String>,
    #[serde(default)]
    pub secret_env_var: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_tries() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    300
}

fn default_max_delay_secs() -> u64 {
    86_400
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: default_max_tries(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_file: Option<String>,
    #[serde(default)]
    pub password_env_var: Option<String>,
    #[serde(default)]
    pub tls: SmtpTls,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    None,
    #[default]
    Starttls,
    Wrapper,
}
