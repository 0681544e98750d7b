//! Secret lookup for the SMTP password and the web-version link key, plus
//! the cipher that seals web-version link claims.
//!
//! A secret may be given as a direct value, a file (Docker secrets) or an
//! environment variable (Kubernetes). The first non-empty source wins.

use std::fs;
use std::path::PathBuf;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::config::{SmtpConfig, WebVersionConfig};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret configured for {0}")]
    NotConfigured(&'static str),

    #[error("Failed to read secret file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Failed to seal payload: {0}")]
    Seal(String),

    #[error("Failed to open sealed payload: {0}")]
    Open(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// The configured locations of one secret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecretSource<'a> {
    /// What the secret is for, used in error messages.
    pub purpose: &'static str,
    pub value: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl<'a> SecretSource<'a> {
    pub fn smtp_password(config: &'a SmtpConfig) -> Self {
        Self {
            purpose: "smtp password",
            value: config.password.as_deref(),
            file: config.password_file.as_deref(),
            env_var: config.password_env_var.as_deref(),
        }
    }

    pub fn web_version(config: &'a WebVersionConfig) -> Self {
        Self {
            purpose: "web version links",
            value: config.secret.as_deref(),
            file: config.secret_file.as_deref(),
            env_var: config.secret_env_var.as_deref(),
        }
    }

    pub fn is_configured(&self) -> bool {
        non_empty(self.value).is_some()
            || non_empty(self.file).is_some()
            || non_empty(self.env_var).is_some()
    }

    /// Reads the secret from the first configured source.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(value) = non_empty(self.value) {
            return Ok(SecretString::from(value));
        }

        if let Some(file) = non_empty(self.file) {
            let path = expand_home(file);
            return fs::read_to_string(&path)
                .map(|content| SecretString::from(content.trim()))
                .map_err(|source| SecretError::FileRead { path, source });
        }

        if let Some(name) = non_empty(self.env_var) {
            return match std::env::var(name) {
                // Env vars may carry a trailing newline.
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NotConfigured(self.purpose))
    }

    /// Like [`SecretSource::resolve`], but an unconfigured secret is `None`.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        if !self.is_configured() {
            return Ok(None);
        }
        self.resolve().map(Some)
    }
}

/// Expands a leading `~/` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}

const NONCE_SIZE: usize = 12;

/// AES-256-GCM keyed with the SHA-256 digest of a password.
///
/// Sealed output is `<12-byte nonce><ciphertext>`.
pub struct LinkCipher {
    cipher: Aes256Gcm,
}

impl LinkCipher {
    pub fn from_password(password: &SecretString) -> Result<Self> {
        let password = password.expose_secret();
        if password.is_empty() {
            return Err(SecretError::InvalidKey("password must not be empty".to_string()));
        }

        let key = Sha256::digest(password.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::fill(&mut nonce).map_err(|e| SecretError::Seal(format!("no randomness: {}", e)))?;

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| SecretError::Seal(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_SIZE {
            return Err(SecretError::Open("payload too short".to_string()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| SecretError::Open(e.to_string()))
    }
}
