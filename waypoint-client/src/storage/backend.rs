use std::{
    fs, io,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use keyring::Entry;
use thiserror::Error;

/// The single namespaced key every backend stores the credential record under.
pub const CREDENTIAL_KEY: &str = "waypoint.tokens.v1";
const SERVICE_NAME: &str = "com.waypoint.client";
const STORAGE_DIR: &str = "waypoint";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration directory unavailable for token storage")]
    MissingConfigDir,
}

/// Durable storage for one opaque credential blob.
pub trait CredentialBackend: Send + Sync {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn save(&self, raw: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

pub struct KeyringBackend {
    entry: Entry,
}

impl KeyringBackend {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            entry: Entry::new(SERVICE_NAME, CREDENTIAL_KEY)?,
        })
    }
}

impl CredentialBackend for KeyringBackend {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match self.entry.get_password() {
            Ok(raw) => Ok(Some(raw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(StorageError::Keyring(err)),
        }
    }

    fn save(&self, raw: &str) -> Result<(), StorageError> {
        self.entry.set_password(raw)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(StorageError::Keyring(err)),
        }
    }
}

/// JSON file under the user configuration directory.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new_default() -> Result<Self, StorageError> {
        let dir = dirs::config_dir().ok_or(StorageError::MissingConfigDir)?;
        Ok(Self::at(dir.join(STORAGE_DIR).join(format!("{CREDENTIAL_KEY}.json"))))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".partial");
        self.path.with_file_name(name)
    }
}

impl CredentialBackend for FileBackend {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, raw: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = self.partial_path();
        fs::write(&partial, raw)?;
        fs::rename(partial, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
        }
    }
}

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, raw: &str) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(raw.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
