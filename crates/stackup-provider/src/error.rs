//! Provider error types

/// Result type for remote operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Remote call failures. Every variant keeps the provider's raw payload for
/// diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("transient failure: {message}")]
    Transient {
        message: String,
        payload: Option<String>,
    },

    #[error("not authorized: {message}")]
    Auth {
        message: String,
        payload: Option<String>,
    },

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        payload: Option<String>,
    },

    #[error("not found: {message}")]
    NotFound {
        message: String,
        payload: Option<String>,
    },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        payload: Option<String>,
    },

    #[error("invalid response: {message}")]
    InvalidResponse {
        message: String,
        payload: Option<String>,
    },
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            payload: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            payload: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            payload: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            payload: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            payload: None,
        }
    }

    /// Map an HTTP status and body to an error kind.
    pub fn from_status(status: u16, body: String) -> Self {
        let message = format!("status {}", status);
        let payload = if body.is_empty() { None } else { Some(body) };
        match status {
            401 | 403 => Self::Auth { message, payload },
            400 | 422 => Self::Validation { message, payload },
            404 => Self::NotFound { message, payload },
            409 => Self::Conflict { message, payload },
            408 | 429 | 500..=599 => Self::Transient { message, payload },
            _ => Self::InvalidResponse { message, payload },
        }
    }

    /// Only transient failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Transient { payload, .. }
            | Self::Auth { payload, .. }
            | Self::Validation { payload, .. }
            | Self::NotFound { payload, .. }
            | Self::Conflict { payload, .. }
            | Self::InvalidResponse { payload, .. } => payload.as_deref(),
        }
    }

    pub fn with_payload(mut self, body: impl Into<String>) -> Self {
        match &mut self {
            Self::Transient { payload, .. }
            | Self::Auth { payload, .. }
            | Self::Validation { payload, .. }
            | Self::NotFound { payload, .. }
            | Self::Conflict { payload, .. }
            | Self::InvalidResponse { payload, .. } => *payload = Some(body.into()),
        }
        self
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::transient(e.to_string())
        } else if e.is_decode() {
            Self::InvalidResponse {
                message: e.to_string(),
                payload: None,
            }
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), String::new())
        } else {
            Self::transient(e.to_string())
        }
    }
}
