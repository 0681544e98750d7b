//! Links to the public "view in browser" page of a message.
//!
//! The link carries the message code in clear and an encrypted hash of
//! `{t: timestamp, c: code, u: nonce}` that the page handler opens again.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::PostmanConfig;
use crate::error::ConfigError;
use crate::secrets::{LinkCipher, SecretError, SecretSource};

/// Marker in message bodies replaced by the link.
pub const WEB_VERSION_MARKER: &str = "#web_version#";

const LETTER_PATH: &str = "letter/show";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebVersionClaims {
    /// Unix time the link was issued.
    pub t: i64,
    /// Message code.
    pub c: String,
    /// Random nonce.
    pub u: String,
}

pub struct WebVersionSigner {
    base: Url,
    cipher: Option<LinkCipher>,
}

impl WebVersionSigner {
    pub fn new(base_url: &str, secret: Option<&SecretString>) -> Result<Self, ConfigError> {
        let base = format!("{}/{}", base_url.trim_end_matches('/'), LETTER_PATH);
        let base = Url::parse(&base).map_err(|e| ConfigError::Validation {
            message: format!("Invalid web version base URL '{}': {}", base_url, e),
        })?;

        let cipher = match secret {
            Some(secret) => Some(LinkCipher::from_password(secret).map_err(|e| {
                ConfigError::Validation {
                    message: format!("Invalid web version secret: {}", e),
                }
            })?),
            None => None,
        };

        Ok(Self { base, cipher })
    }

    pub fn from_config(config: &PostmanConfig) -> Result<Self, ConfigError> {
        let secret = SecretSource::web_version(&config.web_version)
            .resolve_optional()
            .map_err(|e| ConfigError::Validation {
                message: format!("Cannot resolve web version secret: {}", e),
            })?;

        if secret.is_none() {
            log::warn!("No web version secret configured, links will carry no hash");
        }

        Self::new(
            config.web_version.base_url.as_deref().unwrap_or(&config.host),
            secret.as_ref(),
        )
    }

    /// Builds the public URL for a message code.
    pub fn url_for(&self, code: &str) -> Result<String, SecretError> {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", code);

            if let Some(cipher) = &self.cipher {
                let claims = WebVersionClaims {
                    t: chrono::Utc::now().timestamp(),
                    c: code.to_string(),
                    u: uuid::Uuid::new_v4().simple().to_string(),
                };
                let payload = serde_json::to_vec(&claims)
                    .map_err(|e| SecretError::Seal(e.to_string()))?;
                let hash = STANDARD.encode(cipher.seal(&payload)?);
                query.append_pair("hash", &hash);
            }
        }
        Ok(url.into())
    }

    /// Decrypts the `hash` query value of a link.
    pub fn open(&self, hash: &str) -> Result<WebVersionClaims, SecretError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| SecretError::InvalidKey("no web version secret configured".to_string()))?;
        let combined = STANDARD
            .decode(hash)
            .map_err(|e| SecretError::Open(e.to_string()))?;
        let payload = cipher.open(&combined)?;
        serde_json::from_slice(&payload).map_err(|e| SecretError::Open(e.to_string()))
    }
}
