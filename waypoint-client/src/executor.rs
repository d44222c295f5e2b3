use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;
use waypoint_core::{ApiEndpoints, Route};

use crate::error::{ApiError, check_status};
use crate::storage::CredentialStore;
use crate::token_provider::TokenProvider;

/// One logical API call. The body is kept as `Bytes` so the call can be re-sent.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub auth_required: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            auth_required: true,
        }
    }

    pub fn route(route: Route<'_>) -> Self {
        Self::new(route.method(), route.path_and_query())
    }

    pub fn json<T: Serialize + ?Sized>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(Bytes::from(serde_json::to_vec(payload)?));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.auth_required = false;
        self
    }
}

/// Sends API calls with the stored bearer token and recovers once from a 401.
#[derive(Clone)]
pub struct ApiExecutor {
    http: Client,
    endpoints: ApiEndpoints,
    store: Arc<CredentialStore>,
    tokens: TokenProvider,
}

impl ApiExecutor {
    pub fn new(http: Client, endpoints: ApiEndpoints, tokens: TokenProvider) -> Self {
        Self {
            http,
            endpoints,
            store: tokens.store().clone(),
            tokens,
        }
    }

    /// Returns the response whatever its status; only transport failures are errors.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let url = self.endpoints.resolve(&request.path)?;
        let token = if request.auth_required {
            self.store.load().map(|credential| credential.access_token)
        } else {
            None
        };

        let response = self.send(&url, request, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || !request.auth_required {
            return Ok(response);
        }
        let Some(rejected) = token else {
            return Ok(response);
        };

        match self.tokens.refresh_rejected(&rejected).await {
            Ok(fresh) => {
                debug!(path = %request.path, "retrying request after token refresh");
                self.send(&url, request, Some(&fresh)).await
            }
            Err(err) => {
                warn!(path = %request.path, error = %err, "refresh after 401 failed");
                Ok(response)
            }
        }
    }

    /// Like [`execute`](Self::execute) but maps non-2xx statuses onto [`ApiError`].
    pub async fn execute_checked(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        check_status(self.execute(request).await?).await
    }

    pub async fn execute_json<T: serde::de::DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, ApiError> {
        let response = self.execute_checked(request).await?;
        response.json::<T>().await.map_err(ApiError::Network)
    }

    async fn send(
        &self,
        url: &Url,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .headers(request.headers.clone());
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder.send().await.map_err(ApiError::Network)
    }
}
