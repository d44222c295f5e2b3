use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tracing::{info, warn};
use waypoint_core::{ApiEndpoints, AuthClient, LoginRequest, Route, TokenGrant};

use crate::config::ClientConfig;
use crate::error::{ApiError, AuthError};
use crate::events::EventListener;
use crate::executor::{ApiExecutor, ApiRequest};
use crate::fs_api::FsApi;
use crate::storage::{Credential, CredentialBackend, CredentialStore, StorageError, open_backend};
use crate::token_provider::TokenProvider;
use crate::transfer::{DirectorySink, DownloadSink, TransferQueue, TransferRunner};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid api base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("token storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Wires the credential store, refresh coordinator and executor for one backend.
#[derive(Clone)]
pub struct Session {
    config: ClientConfig,
    http: Client,
    endpoints: ApiEndpoints,
    store: Arc<CredentialStore>,
    tokens: TokenProvider,
    executor: ApiExecutor,
}

impl Session {
    pub fn open(config: ClientConfig) -> Result<Self, SessionError> {
        let backend = open_backend(config.token_backend)?;
        Self::with_backend(config, backend)
    }

    pub fn with_backend(
        config: ClientConfig,
        backend: Arc<dyn CredentialBackend>,
    ) -> Result<Self, SessionError> {
        let http = Client::new();
        let endpoints = ApiEndpoints::new(&config.api_base_url)?;
        let store = Arc::new(CredentialStore::new(backend));
        let auth = AuthClient::with_http(http.clone(), endpoints.clone());
        let tokens = TokenProvider::new(store.clone(), auth);
        let executor = ApiExecutor::new(http.clone(), endpoints.clone(), tokens.clone());
        Ok(Self {
            config,
            http,
            endpoints,
            store,
            tokens,
            executor,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.load().is_some()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Credential, ApiError> {
        let request = ApiRequest::route(Route::Login)
            .json(&LoginRequest { username, password })?
            .without_auth();
        let response = self.executor.execute(&request).await?;
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "login rejected");
            return Err(AuthError::InvalidCredentials.into());
        }
        let grant: TokenGrant = response.json().await.map_err(ApiError::Network)?;
        let credential = self.store.save(&grant);
        info!("signed in");
        Ok(credential)
    }

    /// Tells the server (best effort) and always forgets the local credential.
    pub async fn logout(&self) {
        if self.is_authenticated() {
            match self.executor.execute(&ApiRequest::route(Route::Logout)).await {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = response.status().as_u16(), "server logout rejected");
                }
                Err(err) => warn!(error = %err, "server logout failed"),
                Ok(_) => {}
            }
        }
        self.store.clear();
        info!("signed out");
    }

    pub fn fs(&self) -> FsApi {
        FsApi::new(self.executor.clone())
    }

    /// A transfer queue saving downloads into the configured download directory.
    pub fn transfers(&self) -> TransferQueue {
        self.transfers_into(Arc::new(DirectorySink::new(self.config.download_dir.clone())))
    }

    pub fn transfers_into(&self, sink: Arc<dyn DownloadSink>) -> TransferQueue {
        let runner = TransferRunner::new(
            self.http.clone(),
            self.endpoints.clone(),
            self.tokens.clone(),
            self.executor.clone(),
            sink,
        )
        .with_buffered_downloads(self.config.buffered_downloads);
        TransferQueue::new(runner)
    }

    pub fn events(&self) -> EventListener {
        EventListener::new(self.endpoints.clone(), self.tokens.clone())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    pub fn executor(&self) -> &ApiExecutor {
        &self.executor
    }
}
