pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod fs_api;
pub mod session;
pub mod storage;
pub mod token_provider;
pub mod transfer;

pub use config::{ClientConfig, ConfigError, TokenBackendKind};
pub use error::{ApiError, AuthError};
pub use events::{EventError, EventListener, EventSubscription, affects_folder};
pub use session::{Session, SessionError};
pub use transfer::{
    DownloadSpec, JobId, TransferJob, TransferKind, TransferQueue, TransferStatus, UploadSpec,
};
