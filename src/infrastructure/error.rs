use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("not authenticated: no bearer token available")]
    Unauthenticated,
    #[error("network error: {0}")]
    Network(String),
    #[error("{detail}")]
    Http { status: u16, detail: String },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl InfraError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
