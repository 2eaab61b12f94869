use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use url::Url;

const CLIENT_JSON: &str = "client.json";
const SUPPORTED_SCHEMA: u64 = 1;
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const API_URL_KEYS: [&str; 2] = ["STUDYPLAN_API_URL", "API_BASE_URL"];
const TIMEZONE_KEYS: [&str; 1] = ["STUDYPLAN_TIMEZONE"];
const TOKEN_KEYS: [&str; 1] = ["STUDYPLAN_TOKEN"];

/// How coarse the in-flight guard for block edits is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// One pending edit per block; different blocks may be edited concurrently.
    Block,
    /// One pending edit for the whole plan.
    #[default]
    Plan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub timezone: String,
    pub default_event_minutes: u32,
    pub lock_scope: LockScope,
    pub request_timeout_seconds: u64,
    pub credential_service: String,
    pub credential_account: String,
    #[serde(skip)]
    pub static_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timezone: "UTC".to_string(),
            default_event_minutes: 60,
            lock_scope: LockScope::Plan,
            request_timeout_seconds: 30,
            credential_service: "studyplan.api".to_string(),
            credential_account: "default".to_string(),
            static_token: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        self.api_url()?;
        self.tz()?;
        if self.default_event_minutes == 0 {
            return Err(InfraError::InvalidConfig(
                "defaultEventMinutes must be > 0".to_string(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(InfraError::InvalidConfig(
                "requestTimeoutSeconds must be > 0".to_string(),
            ));
        }
        if self.credential_service.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "credentialService must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn api_url(&self) -> Result<Url, InfraError> {
        Url::parse(self.api_base_url.trim()).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid apiBaseUrl '{}': {error}",
                self.api_base_url
            ))
        })
    }

    pub fn tz(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{}': {error}", self.timezone))
        })
    }
}

fn default_client_file() -> Result<serde_json::Value, InfraError> {
    let mut value = serde_json::to_value(ClientConfig::default())?;
    if let Some(object) = value.as_object_mut() {
        object.insert("schema".to_string(), serde_json::json!(SUPPORTED_SCHEMA));
    }
    Ok(value)
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(CLIENT_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_client_file()?)?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_client_config(config_dir: &Path) -> Result<ClientConfig, InfraError> {
    let raw = read_config(&config_dir.join(CLIENT_JSON))?;
    let config: ClientConfig = serde_json::from_value(raw)?;
    config.validate()?;
    Ok(config)
}

pub fn apply_overrides<F>(mut config: ClientConfig, lookup: F) -> Result<ClientConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(api_url) = optional_lookup_value(&lookup, &API_URL_KEYS) {
        config.api_base_url = api_url;
    }
    if let Some(timezone) = optional_lookup_value(&lookup, &TIMEZONE_KEYS) {
        config.timezone = timezone;
    }
    config.static_token = optional_lookup_value(&lookup, &TOKEN_KEYS);
    config.validate()?;
    Ok(config)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
