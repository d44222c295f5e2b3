use std::io;

use reqwest::{Response, StatusCode};
use thiserror::Error;

/// Session failures. Cloneable so one refresh outcome can be shared by every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("precondition failed: remote resource changed since last listing")]
    Precondition,
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error("Network error")]
    Network(#[source] reqwest::Error),
    #[error("Canceled")]
    Canceled,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    Precondition,
    Http,
    Network,
    Canceled,
    Local,
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Auth(_) => ErrorClass::Auth,
            ApiError::Precondition => ErrorClass::Precondition,
            ApiError::Http { .. } => ErrorClass::Http,
            ApiError::Network(_) => ErrorClass::Network,
            ApiError::Canceled => ErrorClass::Canceled,
            ApiError::Io(_) | ApiError::Url(_) | ApiError::Encode(_) => ErrorClass::Local,
        }
    }

    /// User-initiated aborts are not failures.
    pub fn is_failure(&self) -> bool {
        self.class() != ErrorClass::Canceled
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Precondition => Some(StatusCode::PRECONDITION_FAILED),
            _ => None,
        }
    }
}

/// Maps a non-2xx response onto the error taxonomy, consuming its body.
pub(crate) async fn error_for_response(response: Response) -> ApiError {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED => AuthError::NotAuthenticated.into(),
        StatusCode::PRECONDITION_FAILED => ApiError::Precondition,
        _ => {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                format!(
                    "request failed ({} {})",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown status")
                )
            } else {
                body
            };
            ApiError::Http { status, message }
        }
    }
}

/// Passes 2xx responses through and classifies everything else.
pub(crate) async fn check_status(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_for_response(response).await)
    }
}
