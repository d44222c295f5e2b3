use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    DownloadSpec, JobId, ProgressFn, TransferJob, TransferKind, TransferRunner, TransferStatus,
    UploadSpec,
};
use crate::error::ApiError;

enum Work {
    Upload(UploadSpec),
    Download(DownloadSpec),
}

/// Owns every transfer job and dispatches each one as soon as it is enqueued.
///
/// The job list is published through a `watch` channel, most recent first. Job
/// state is only ever changed here: progress and outcomes reported by the runner
/// are applied through `record_progress` and `finish`, which ignore anything
/// arriving for a job that is no longer running.
#[derive(Clone)]
pub struct TransferQueue {
    runner: Arc<TransferRunner>,
    jobs: Arc<watch::Sender<Vec<TransferJob>>>,
    handles: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl TransferQueue {
    pub fn new(runner: TransferRunner) -> Self {
        let (jobs, _) = watch::channel(Vec::new());
        Self {
            runner: Arc::new(runner),
            jobs: Arc::new(jobs),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn enqueue_upload(&self, spec: UploadSpec) -> JobId {
        let job = TransferJob::queued(
            JobId::new(),
            TransferKind::Upload,
            spec.remote_path.clone(),
            spec.display_name(),
        );
        self.dispatch(job, Work::Upload(spec))
    }

    pub fn enqueue_download(&self, spec: DownloadSpec) -> JobId {
        let job = TransferJob::queued(
            JobId::new(),
            TransferKind::Download,
            spec.remote_path.clone(),
            spec.display_name.clone(),
        );
        self.dispatch(job, Work::Download(spec))
    }

    /// Aborts a queued or running job. Cancelling a finished job does nothing.
    pub fn cancel(&self, id: JobId) {
        if let Some(token) = self.lock_handles().remove(&id) {
            token.cancel();
        }
        let canceled = self.jobs.send_if_modified(|jobs| {
            match jobs.iter_mut().find(|job| job.id == id) {
                Some(job) if !job.status.is_terminal() => {
                    job.status = TransferStatus::Canceled;
                    true
                }
                _ => false,
            }
        });
        if canceled {
            info!(job = %id, "transfer canceled");
        }
    }

    /// Drops every job in a terminal state; queued and running jobs keep their order.
    pub fn clear_finished(&self) {
        self.jobs.send_if_modified(|jobs| {
            let before = jobs.len();
            jobs.retain(|job| !job.status.is_terminal());
            jobs.len() != before
        });
    }

    pub fn snapshot(&self) -> Vec<TransferJob> {
        self.jobs.borrow().clone()
    }

    pub fn get(&self, id: JobId) -> Option<TransferJob> {
        self.jobs.borrow().iter().find(|job| job.id == id).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<TransferJob>> {
        self.jobs.subscribe()
    }

    /// Waits until the job reaches a terminal state. `None` if it is not (or no
    /// longer) in the queue.
    pub async fn settled(&self, id: JobId) -> Option<TransferJob> {
        let mut rx = self.subscribe();
        let jobs = rx
            .wait_for(|jobs| {
                jobs.iter()
                    .find(|job| job.id == id)
                    .is_none_or(|job| job.status.is_terminal())
            })
            .await
            .ok()?;
        jobs.iter().find(|job| job.id == id).cloned()
    }

    /// Number of cancel handles still held, one per unsettled job.
    pub fn live_handles(&self) -> usize {
        self.lock_handles().len()
    }

    fn dispatch(&self, job: TransferJob, work: Work) -> JobId {
        let id = job.id;
        let cancel = CancellationToken::new();
        self.lock_handles().insert(id, cancel.clone());
        self.jobs.send_modify(|jobs| jobs.insert(0, job));
        debug!(job = %id, "transfer queued");

        let queue = self.clone();
        tokio::spawn(async move { queue.drive(id, work, cancel).await });
        id
    }

    async fn drive(self, id: JobId, work: Work, cancel: CancellationToken) {
        if cancel.is_cancelled() || !self.mark_running(id) {
            self.release(id);
            return;
        }

        let progress: ProgressFn = {
            let queue = self.clone();
            Arc::new(move |done, total| queue.record_progress(id, done, total))
        };
        let outcome = match &work {
            Work::Upload(spec) => self.runner.upload(spec, &cancel, progress).await.map(|()| None),
            Work::Download(spec) => self.runner.download(spec, &cancel, progress).await.map(Some),
        };

        if !self.finish(id, &outcome) {
            if let Ok(Some(saved)) = &outcome {
                discard_download(id, saved).await;
            }
        }
        self.release(id);
    }

    fn mark_running(&self, id: JobId) -> bool {
        self.jobs.send_if_modified(|jobs| {
            match jobs.iter_mut().find(|job| job.id == id) {
                Some(job) if job.status == TransferStatus::Queued => {
                    job.status = TransferStatus::Running;
                    true
                }
                _ => false,
            }
        })
    }

    fn record_progress(&self, id: JobId, done: u64, total: Option<u64>) {
        self.jobs.send_if_modified(|jobs| {
            match jobs.iter_mut().find(|job| job.id == id) {
                Some(job) if job.status == TransferStatus::Running && done >= job.bytes_transferred => {
                    job.bytes_transferred = done;
                    job.bytes_total = total;
                    true
                }
                _ => false,
            }
        });
    }

    /// Applies the runner's outcome if the job is still running. Returns whether it did.
    fn finish(&self, id: JobId, outcome: &Result<Option<PathBuf>, ApiError>) -> bool {
        let (status, message) = match outcome {
            Ok(_) => (TransferStatus::Done, None),
            Err(ApiError::Canceled) => (TransferStatus::Canceled, None),
            Err(err) => (TransferStatus::Error, Some(err.to_string())),
        };
        let applied = self.jobs.send_if_modified(|jobs| {
            match jobs.iter_mut().find(|job| job.id == id) {
                Some(job) if job.status == TransferStatus::Running => {
                    job.status = status;
                    job.error_message = message.clone();
                    true
                }
                _ => false,
            }
        });
        if !applied {
            debug!(job = %id, status = status.as_str(), "late outcome discarded");
            return false;
        }
        match outcome {
            Err(err) if err.is_failure() => warn!(job = %id, error = %err, "transfer failed"),
            _ => info!(job = %id, status = status.as_str(), "transfer settled"),
        }
        true
    }

    fn release(&self, id: JobId) {
        self.lock_handles().remove(&id);
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A download that finished saving after its job was canceled must not stay behind.
async fn discard_download(id: JobId, saved: &Path) {
    match tokio::fs::remove_file(saved).await {
        Ok(()) => info!(job = %id, path = %saved.display(), "removed download of canceled job"),
        Err(err) => warn!(job = %id, error = %err, "failed to remove download of canceled job"),
    }
}
