use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};
use waypoint_core::AuthClient;

use crate::error::AuthError;
use crate::storage::{CredentialStore, now_unix_ms};

type SharedRefresh = Shared<BoxFuture<'static, Result<String, AuthError>>>;

struct InflightRefresh {
    generation: u64,
    refresh_token: String,
    outcome: SharedRefresh,
}

/// Hands out access tokens, refreshing them at most once at a time.
///
/// Concurrent callers that find the credential expired all await the same refresh
/// call. The slot is checked and filled under one lock with no suspension in
/// between, and emptied once the refresh settles.
#[derive(Clone)]
pub struct TokenProvider {
    store: Arc<CredentialStore>,
    auth: AuthClient,
    inflight: Arc<Mutex<Option<InflightRefresh>>>,
    generations: Arc<AtomicU64>,
}

impl TokenProvider {
    pub fn new(store: Arc<CredentialStore>, auth: AuthClient) -> Self {
        Self {
            store,
            auth,
            inflight: Arc::new(Mutex::new(None)),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub async fn valid_access_token(&self) -> Result<String, AuthError> {
        let credential = self.store.load().ok_or(AuthError::NotAuthenticated)?;
        if credential.is_usable_at(now_unix_ms()) {
            return Ok(credential.access_token);
        }
        debug!("access token inside safety window, refreshing");
        self.join_refresh(credential.refresh_token).await
    }

    /// Called after the server rejected `rejected_access_token`.
    ///
    /// If another caller already replaced that token, the replacement is returned
    /// without a second refresh.
    pub async fn refresh_rejected(&self, rejected_access_token: &str) -> Result<String, AuthError> {
        let credential = self.store.load().ok_or(AuthError::NotAuthenticated)?;
        if credential.access_token != rejected_access_token {
            return Ok(credential.access_token);
        }
        self.join_refresh(credential.refresh_token).await
    }

    pub async fn refresh_now(&self) -> Result<String, AuthError> {
        let credential = self.store.load().ok_or(AuthError::NotAuthenticated)?;
        self.join_refresh(credential.refresh_token).await
    }

    /// Joins or starts the refresh for `refresh_token`.
    ///
    /// The stored credential is re-read under the slot lock: if another refresh has
    /// already rotated the pair and the new token is usable, it is returned as is.
    async fn join_refresh(&self, refresh_token: String) -> Result<String, AuthError> {
        let (generation, outcome) = {
            let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            let current = self.store.load().ok_or(AuthError::NotAuthenticated)?;
            if current.refresh_token != refresh_token && current.is_usable_at(now_unix_ms()) {
                debug!("credential already rotated by a concurrent refresh");
                return Ok(current.access_token);
            }
            let refresh_token = current.refresh_token;
            match slot.as_ref() {
                Some(inflight) if inflight.refresh_token == refresh_token => {
                    (inflight.generation, inflight.outcome.clone())
                }
                _ => {
                    let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                    let outcome = self.refresh_call(refresh_token.clone()).boxed().shared();
                    *slot = Some(InflightRefresh {
                        generation,
                        refresh_token,
                        outcome: outcome.clone(),
                    });
                    (generation, outcome)
                }
            }
        };

        let result = outcome.await;
        self.settle(generation);
        result
    }

    fn settle(&self, generation: u64) {
        let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|inflight| inflight.generation == generation)
        {
            *slot = None;
        }
    }

    fn refresh_call(
        &self,
        refresh_token: String,
    ) -> impl Future<Output = Result<String, AuthError>> + Send + 'static {
        let auth = self.auth.clone();
        let store = self.store.clone();
        async move {
            info!("refreshing access token");
            match auth.refresh(&refresh_token).await {
                Ok(grant) => {
                    let credential = store.save(&grant);
                    info!(expires_in = credential.expires_in, "access token refreshed");
                    Ok(credential.access_token)
                }
                Err(err) => {
                    warn!(error = %err, "token refresh failed, clearing session");
                    store.clear();
                    Err(AuthError::RefreshFailed(err.to_string()))
                }
            }
        }
    }
}
