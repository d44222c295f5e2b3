mod backend;
mod credential_store;

use std::sync::Arc;

pub use backend::{
    CREDENTIAL_KEY, CredentialBackend, FileBackend, KeyringBackend, MemoryBackend, StorageError,
};
pub use credential_store::{Credential, CredentialStore, SAFETY_WINDOW, now_unix_ms};

use crate::config::TokenBackendKind;

pub fn open_backend(kind: TokenBackendKind) -> Result<Arc<dyn CredentialBackend>, StorageError> {
    Ok(match kind {
        TokenBackendKind::Keyring => Arc::new(KeyringBackend::new()?),
        TokenBackendKind::File => Arc::new(FileBackend::new_default()?),
    })
}
