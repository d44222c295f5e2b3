use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::endpoints::{ApiEndpoints, Route};
use crate::models::{RefreshRequest, TokenGrant};

#[derive(Debug, Error)]
pub enum AuthClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Exchanges a refresh token for a new token pair.
///
/// The call is unauthenticated: the refresh token in the body is the credential.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    endpoints: ApiEndpoints,
}

impl AuthClient {
    pub fn new(endpoints: ApiEndpoints) -> Self {
        Self::with_http(Client::new(), endpoints)
    }

    pub fn with_http(http: Client, endpoints: ApiEndpoints) -> Self {
        Self { http, endpoints }
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthClientError> {
        let url = self.endpoints.route(Route::Refresh)?;
        let response = self
            .http
            .post(url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json::<TokenGrant>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthClientError::Api { status, body })
        }
    }
}
