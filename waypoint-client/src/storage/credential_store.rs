use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use waypoint_core::TokenGrant;

use super::backend::CredentialBackend;

/// A credential stops being usable this long before it actually expires.
pub const SAFETY_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Unix epoch milliseconds at which the pair was obtained.
    pub acquired_at: i64,
}

impl Credential {
    pub fn from_grant(grant: &TokenGrant, acquired_at: i64) -> Self {
        Self {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            expires_in: grant.expires_in,
            acquired_at,
        }
    }

    pub fn expires_at(&self) -> i64 {
        let lifetime_ms = i64::try_from(self.expires_in.saturating_mul(1000)).unwrap_or(i64::MAX);
        self.acquired_at.saturating_add(lifetime_ms)
    }

    pub fn is_usable_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at().saturating_sub(SAFETY_WINDOW.as_millis() as i64)
    }
}

/// Sole owner of the current credential.
///
/// The record is cached in memory; the backend is written through on every change
/// but a backend failure never loses the in-memory copy.
pub struct CredentialStore {
    backend: Arc<dyn CredentialBackend>,
    current: Mutex<Option<Credential>>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn CredentialBackend>) -> Self {
        let current = read_backend(backend.as_ref());
        Self {
            backend,
            current: Mutex::new(current),
        }
    }

    pub fn load(&self) -> Option<Credential> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stamps `acquired_at = now`, replaces the record and persists it.
    pub fn save(&self, grant: &TokenGrant) -> Credential {
        let credential = Credential::from_grant(grant, now_unix_ms());
        self.replace(credential.clone());
        credential
    }

    pub fn clear(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        if let Err(err) = self.backend.clear() {
            warn!(error = %err, "failed to clear persisted credential");
        }
    }

    fn replace(&self, credential: Credential) {
        match serde_json::to_string(&credential) {
            Ok(raw) => {
                if let Err(err) = self.backend.save(&raw) {
                    warn!(error = %err, "failed to persist credential, keeping it in memory");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode credential"),
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential);
    }
}

fn read_backend(backend: &dyn CredentialBackend) -> Option<Credential> {
    let raw = match backend.load() {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!(error = %err, "credential storage unreadable, treating as signed out");
            return None;
        }
    };
    match serde_json::from_str::<Credential>(&raw) {
        Ok(credential) => Some(credential),
        Err(err) => {
            debug!(error = %err, "stored credential is corrupt, ignoring it");
            None
        }
    }
}

pub fn now_unix_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::MemoryBackend;

    fn grant(access: &str) -> TokenGrant {
        TokenGrant {
            access_token: access.into(),
            refresh_token: format!("{access}-refresh"),
            expires_in: 900,
        }
    }

    #[test]
    fn corrupt_record_is_treated_as_absent() {
        let store = CredentialStore::new(Arc::new(MemoryBackend::with_raw("{not json")));
        assert!(store.load().is_none());
    }

    #[test]
    fn save_stamps_acquisition_time_and_persists() {
        let backend = Arc::new(MemoryBackend::default());
        let store = CredentialStore::new(backend.clone());

        let before = now_unix_ms();
        let credential = store.save(&grant("access-1"));
        let after = now_unix_ms();

        assert!(credential.acquired_at >= before && credential.acquired_at <= after);
        assert_eq!(store.load(), Some(credential.clone()));

        let reopened = CredentialStore::new(backend);
        assert_eq!(reopened.load(), Some(credential));
    }

    #[test]
    fn clear_removes_memory_and_persisted_copy() {
        let backend = Arc::new(MemoryBackend::default());
        let store = CredentialStore::new(backend.clone());
        store.save(&grant("access-1"));

        store.clear();

        assert!(store.load().is_none());
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn usable_only_before_safety_window() {
        let credential = Credential {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: 60,
            acquired_at: 1_000_000,
        };
        assert_eq!(credential.expires_at(), 1_060_000);
        assert!(credential.is_usable_at(1_029_999));
        assert!(!credential.is_usable_at(1_030_000));
        assert!(!credential.is_usable_at(1_070_000));
    }
}
