use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

/// Source of the bearer token attached to every API request.
pub trait TokenProvider: Send + Sync {
    fn load_token(&self) -> Result<Option<String>, InfraError>;

    fn require_token(&self) -> Result<String, InfraError> {
        self.load_token()?
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or(InfraError::Unauthenticated)
    }
}

#[derive(Debug, Clone)]
pub struct KeyringTokenProvider {
    service_name: String,
    account_name: String,
}

impl KeyringTokenProvider {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    pub fn save_token(&self, token: &str) -> Result<(), InfraError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(InfraError::Credential("token must not be empty".to_string()));
        }
        self.entry()?
            .set_password(token)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    pub fn delete_token(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

impl Default for KeyringTokenProvider {
    fn default() -> Self {
        Self::new("studyplan.api", "default")
    }
}

impl TokenProvider for KeyringTokenProvider {
    fn load_token(&self) -> Result<Option<String>, InfraError> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn load_token(&self) -> Result<Option<String>, InfraError> {
        Ok(Some(self.token.clone()))
    }
}

/// Token holder for sessions that log in at runtime.
#[derive(Debug, Default)]
pub struct InMemoryTokenProvider {
    token: Mutex<Option<String>>,
}

impl InMemoryTokenProvider {
    pub fn set_token(&self, token: Option<String>) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = token;
        Ok(())
    }
}

impl TokenProvider for InMemoryTokenProvider {
    fn load_token(&self) -> Result<Option<String>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }
}
