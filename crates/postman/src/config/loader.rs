use std::path::Path;

use crate::config::schema::{LayoutVariant, PostmanConfig};
use crate::error::ConfigError;

/// Source format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PostmanConfig, ConfigError> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, format)
}

pub fn load_config_from_str(
    content: &str,
    format: ConfigFormat,
) -> Result<PostmanConfig, ConfigError> {
    let config: PostmanConfig = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &PostmanConfig) -> Result<(), ConfigError> {
    if config.workers == 0 {
        return Err(ConfigError::Validation {
            message: "workers must be greater than 0".to_string(),
        });
    }

    if config.retry.max_tries == 0 {
        return Err(ConfigError::Validation {
            message: "retry.maxTries must be greater than 0".to_string(),
        });
    }

    if config.retry.base_delay_secs > config.retry.max_delay_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "retry.baseDelaySecs ({}) exceeds retry.maxDelaySecs ({})",
                config.retry.base_delay_secs, config.retry.max_delay_secs
            ),
        });
    }

    url::Url::parse(&config.host).map_err(|e| ConfigError::Validation {
        message: format!("Invalid host URL '{}': {}", config.host, e),
    })?;

    if let Some(base_url) = &config.web_version.base_url {
        url::Url::parse(base_url).map_err(|e| ConfigError::Validation {
            message: format!("Invalid webVersion.baseUrl '{}': {}", base_url, e),
        })?;
    }

    for (name, variant) in &config.layout_variants {
        if let LayoutVariant::Files { files } = variant {
            if files.is_empty() {
                return Err(ConfigError::InvalidLayout {
                    name: name.clone(),
                    reason: "files descriptor references no text, html or css view".to_string(),
                });
            }
        }
    }

    if let Some(smtp) = &config.smtp {
        if smtp.host.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "smtp.host must not be empty".to_string(),
            });
        }
    }

    Ok(())
}
