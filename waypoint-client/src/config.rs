use std::path::{Path, PathBuf};

use thiserror::Error;
use waypoint_core::DEFAULT_BASE_URL;

const ENV_API_BASE_URL: &str = "WAYPOINT_API_BASE_URL";
const ENV_TOKEN_BACKEND: &str = "WAYPOINT_TOKEN_BACKEND";
const ENV_DOWNLOAD_DIR: &str = "WAYPOINT_DOWNLOAD_DIR";
const ENV_BUFFERED_DOWNLOADS: &str = "WAYPOINT_BUFFERED_DOWNLOADS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown token backend {0:?} (expected \"keyring\" or \"file\")")]
    UnknownTokenBackend(String),
    #[error("invalid boolean for {name}: {value:?}")]
    InvalidBool { name: &'static str, value: String },
    #[error("no download directory could be determined")]
    MissingDownloadDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBackendKind {
    Keyring,
    File,
}

impl TokenBackendKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            _ => Err(ConfigError::UnknownTokenBackend(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub token_backend: TokenBackendKind,
    pub download_dir: PathBuf,
    /// Read download bodies in one piece instead of chunk by chunk.
    pub buffered_downloads: bool,
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            token_backend: TokenBackendKind::File,
            download_dir: download_dir.into(),
            buffered_downloads: false,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup(ENV_API_BASE_URL)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let token_backend = match lookup(ENV_TOKEN_BACKEND) {
            Some(value) => TokenBackendKind::parse(&value)?,
            None => TokenBackendKind::File,
        };
        let home = dirs::home_dir();
        let download_dir = match lookup(ENV_DOWNLOAD_DIR) {
            Some(value) => expand_with_home(&value, home.as_deref()),
            None => dirs::download_dir()
                .or(home)
                .ok_or(ConfigError::MissingDownloadDir)?,
        };
        let buffered_downloads = match lookup(ENV_BUFFERED_DOWNLOADS) {
            Some(value) => parse_bool(ENV_BUFFERED_DOWNLOADS, &value)?,
            None => false,
        };

        Ok(Self {
            api_base_url,
            token_backend,
            download_dir,
            buffered_downloads,
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name,
            value: value.to_string(),
        }),
    }
}

fn expand_with_home(value: &str, home: Option<&Path>) -> PathBuf {
    match (value.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if value == "~" => home.map(Path::to_path_buf).unwrap_or_else(|| value.into()),
        _ => PathBuf::from(value),
    }
}
