mod guard;
mod queue;
mod runner;
mod sink;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

pub use guard::{UploadGuardError, plan_upload};
pub use queue::TransferQueue;
pub use runner::TransferRunner;
pub use sink::{DirectorySink, DownloadSink};

/// Progress sink: `(bytes_transferred, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Queued,
    Running,
    Done,
    Error,
    Canceled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Done | TransferStatus::Error | TransferStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Queued => "queued",
            TransferStatus::Running => "running",
            TransferStatus::Done => "done",
            TransferStatus::Error => "error",
            TransferStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub id: JobId,
    pub kind: TransferKind,
    pub remote_path: String,
    pub display_name: String,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub bytes_total: Option<u64>,
    pub error_message: Option<String>,
}

impl TransferJob {
    fn queued(id: JobId, kind: TransferKind, remote_path: String, display_name: String) -> Self {
        Self {
            id,
            kind,
            remote_path,
            display_name,
            status: TransferStatus::Queued,
            bytes_transferred: 0,
            bytes_total: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSpec {
    pub local_path: PathBuf,
    /// Full remote destination path, including the file name.
    pub remote_path: String,
    pub overwrite: bool,
    pub if_match: Option<String>,
}

impl UploadSpec {
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            overwrite: false,
            if_match: None,
        }
    }

    pub fn overwrite(mut self, if_match: Option<String>) -> Self {
        self.overwrite = true;
        self.if_match = if_match;
        self
    }

    pub fn display_name(&self) -> String {
        file_name_of(&self.local_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSpec {
    pub remote_path: String,
    pub display_name: String,
}

impl DownloadSpec {
    pub fn new(remote_path: impl Into<String>) -> Self {
        let remote_path = remote_path.into();
        let display_name = remote_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            remote_path,
            display_name,
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TransferStatus::Queued.is_terminal());
        assert!(!TransferStatus::Running.is_terminal());
        assert!(TransferStatus::Done.is_terminal());
        assert!(TransferStatus::Error.is_terminal());
        assert!(TransferStatus::Canceled.is_terminal());
    }

    #[test]
    fn display_names_come_from_last_component() {
        assert_eq!(DownloadSpec::new("Docs/2024/report.csv").display_name, "report.csv");
        assert_eq!(DownloadSpec::new("notes.md").display_name, "notes.md");
        assert_eq!(
            UploadSpec::new("/tmp/in/photo.jpg", "Pics/photo.jpg").display_name(),
            "photo.jpg"
        );
    }
}
