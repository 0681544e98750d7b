use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostmanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Message {0} not found")]
    MessageNotFound(i64),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Unsupported config file extension: {0}")]
    UnsupportedFormat(String),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid layout variant '{name}': {reason}")]
    InvalidLayout { name: String, reason: String },
}

/// Errors that abort composition before a message exists.
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Message template `{0}` not found")]
    TemplateNotFound(String),

    #[error("Invalid layout config for '{name}': {reason}")]
    InvalidLayoutConfig { name: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Failed to deliver message: {0}")]
    Delivery(String),

    #[error("Transport is not configured: {0}")]
    NotConfigured(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Delivery queue channel closed unexpectedly")]
    ChannelClosed,

    #[error("Failed to spawn delivery worker: {0}")]
    SpawnFailed(String),

    #[error("Delivery of message {message_id} failed: {reason}")]
    DispatchFailed { message_id: i64, reason: String },
}

pub type Result<T> = std::result::Result<T, PostmanError>;
