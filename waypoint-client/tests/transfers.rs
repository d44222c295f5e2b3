use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tempfile::{TempDir, tempdir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::timeout;
use waypoint_client::storage::{Credential, MemoryBackend, now_unix_ms};
use waypoint_client::transfer::{DirectorySink, DownloadSink, UploadGuardError, plan_upload};
use waypoint_client::{
    ClientConfig, DownloadSpec, JobId, Session, TransferJob, TransferQueue, TransferStatus,
    UploadSpec,
};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    session: Session,
    dir: TempDir,
}

impl Harness {
    /// A session whose access token expires `expires_in` seconds from now.
    fn new(base_url: &str, expires_in: u64) -> Self {
        let dir = tempdir().unwrap();
        let credential = Credential {
            access_token: "access-1".into(),
            refresh_token: "refresh-1".into(),
            expires_in,
            acquired_at: now_unix_ms(),
        };
        let backend = MemoryBackend::with_raw(serde_json::to_string(&credential).unwrap());
        let session = Session::with_backend(
            ClientConfig::new(base_url, dir.path().join("downloads")),
            Arc::new(backend),
        )
        .unwrap();
        Self { session, dir }
    }

    fn local_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn downloaded(&self, name: &str) -> PathBuf {
        self.dir.path().join("downloads").join(name)
    }
}

async fn settled(queue: &TransferQueue, id: JobId) -> TransferJob {
    timeout(WAIT, queue.settled(id))
        .await
        .expect("job settles in time")
        .expect("job still queued")
}

async fn wait_until<F>(queue: &TransferQueue, id: JobId, condition: F)
where
    F: Fn(&TransferJob) -> bool,
{
    let mut rx = queue.subscribe();
    timeout(
        WAIT,
        rx.wait_for(|jobs| jobs.iter().any(|job| job.id == id && condition(job))),
    )
    .await
    .expect("condition reached in time")
    .unwrap();
}

fn grant(access: &str, refresh: &str) -> serde_json::Value {
    json!({ "access_token": access, "refresh_token": refresh, "expires_in": 900 })
}

#[tokio::test]
async fn upload_inside_safety_window_refreshes_once_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refresh_token": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-2", "refresh-2")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/fs/upload"))
        .and(query_param("path", "Reports/q3.csv"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::new(&server.uri(), 29);
    let source = harness.local_file("q3.csv", b"quarter,total\n3,42\n");
    let queue = harness.session.transfers();

    let id = queue.enqueue_upload(UploadSpec::new(source, "Reports/q3.csv"));
    let job = settled(&queue, id).await;

    assert_eq!(job.status, TransferStatus::Done);
    assert_eq!(job.bytes_transferred, 19);
    assert_eq!(job.bytes_total, Some(19));
    assert_eq!(job.error_message, None);
    assert_eq!(
        harness.session.credentials().load().unwrap().refresh_token,
        "refresh-2"
    );
    assert_eq!(queue.live_handles(), 0);
}

#[tokio::test]
async fn upload_outside_safety_window_keeps_current_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-2", "refresh-2")))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/fs/upload"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::new(&server.uri(), 31);
    let source = harness.local_file("a.txt", b"abc");
    let queue = harness.session.transfers();

    let id = queue.enqueue_upload(UploadSpec::new(source, "a.txt"));

    assert_eq!(settled(&queue, id).await.status, TransferStatus::Done);
}

#[tokio::test]
async fn existing_file_blocks_upload_until_overwrite_and_stale_etag_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fs/list"))
        .and(query_param("path", "Reports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "Reports",
            "items": [
                { "name": "report.csv", "is_dir": false, "size": 4, "mtime": 1, "etag": "etag-7" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/fs/upload"))
        .and(query_param("path", "Reports/report.csv"))
        .and(query_param("overwrite", "true"))
        .and(header("if-match", "etag-7"))
        .respond_with(ResponseTemplate::new(412))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::new(&server.uri(), 900);
    let source = harness.local_file("report.csv", b"new contents");
    let listing = harness.session.fs().list("Reports").await.unwrap();

    let rejected = plan_upload(&listing, "Reports", &source, false).unwrap_err();
    assert_eq!(rejected, UploadGuardError::AlreadyExists("report.csv".into()));

    let spec = plan_upload(&listing, "Reports", &source, true).unwrap();
    let queue = harness.session.transfers();
    let id = queue.enqueue_upload(spec);
    let job = settled(&queue, id).await;

    assert_eq!(job.status, TransferStatus::Error);
    let message = job.error_message.expect("error message recorded");
    assert!(message.contains("precondition"), "{message}");
}

#[tokio::test]
async fn download_lands_in_download_dir() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fs/download"))
        .and(query_param("path", "Media/clip.bin"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::new(&server.uri(), 900);
    let queue = harness.session.transfers();

    let id = queue.enqueue_download(DownloadSpec::new("Media/clip.bin"));
    let job = settled(&queue, id).await;

    assert_eq!(job.status, TransferStatus::Done);
    assert_eq!(job.display_name, "clip.bin");
    assert_eq!(job.bytes_transferred, 4096);
    assert_eq!(std::fs::read(harness.downloaded("clip.bin")).unwrap().len(), 4096);
}

const CHUNK: usize = 1024;
const CHUNKS: usize = 10;

/// Serves one download that announces `CHUNKS` chunks, sends two and stalls.
async fn stalling_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = stream.read(&mut buf).await.unwrap();
            if read == 0 {
                return;
            }
            request.extend_from_slice(&buf[..read]);
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/octet-stream\r\ncontent-length: {}\r\n\r\n",
            CHUNK * CHUNKS
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        for _ in 0..2 {
            stream.write_all(&[1u8; CHUNK]).await.unwrap();
            stream.flush().await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn canceling_mid_download_stops_at_reported_progress() {
    let base_url = stalling_server().await;
    let harness = Harness::new(&base_url, 900);
    let queue = harness.session.transfers();

    let id = queue.enqueue_download(DownloadSpec::new("big.bin"));
    wait_until(&queue, id, |job| job.bytes_transferred == (2 * CHUNK) as u64).await;
    assert_eq!(queue.live_handles(), 1);

    queue.cancel(id);

    let job = queue.get(id).unwrap();
    assert_eq!(job.status, TransferStatus::Canceled);
    assert_eq!(job.bytes_transferred, (2 * CHUNK) as u64);
    assert_eq!(job.bytes_total, Some((CHUNK * CHUNKS) as u64));
    assert_eq!(queue.live_handles(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = queue.get(id).unwrap();
    assert_eq!(job.status, TransferStatus::Canceled);
    assert_eq!(job.bytes_transferred, (2 * CHUNK) as u64);
    assert_eq!(job.error_message, None);
    assert!(!harness.downloaded("big.bin").exists());
}

#[tokio::test]
async fn queued_job_canceled_before_start_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fs/upload"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    let harness = Harness::new(&server.uri(), 900);
    let source = harness.local_file("a.txt", b"abc");
    let queue = harness.session.transfers();

    let id = queue.enqueue_upload(UploadSpec::new(source, "a.txt"));
    assert_eq!(queue.get(id).unwrap().status, TransferStatus::Queued);
    queue.cancel(id);
    queue.cancel(id);

    let job = settled(&queue, id).await;
    assert_eq!(job.status, TransferStatus::Canceled);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.get(id).unwrap().status, TransferStatus::Canceled);
    assert_eq!(queue.live_handles(), 0);
}

#[tokio::test]
async fn cancel_after_completion_changes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fs/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"done".to_vec()))
        .mount(&server)
        .await;
    let harness = Harness::new(&server.uri(), 900);
    let queue = harness.session.transfers();

    let id = queue.enqueue_download(DownloadSpec::new("done.txt"));
    let before = settled(&queue, id).await;
    queue.cancel(id);

    assert_eq!(before.status, TransferStatus::Done);
    assert_eq!(queue.get(id).unwrap(), before);
    assert_eq!(queue.live_handles(), 0);
}

#[tokio::test]
async fn clear_finished_keeps_running_jobs_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fs/download"))
        .and(query_param("path", "slow.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fs/download"))
        .and(query_param("path", "fast.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fast".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fs/download"))
        .and(query_param("path", "missing.bin"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;
    let harness = Harness::new(&server.uri(), 900);
    let queue = harness.session.transfers();

    let slow = queue.enqueue_download(DownloadSpec::new("slow.bin"));
    let fast = queue.enqueue_download(DownloadSpec::new("fast.bin"));
    let missing = queue.enqueue_download(DownloadSpec::new("missing.bin"));

    let order: Vec<JobId> = queue.snapshot().iter().map(|job| job.id).collect();
    assert_eq!(order, vec![missing, fast, slow]);

    assert_eq!(settled(&queue, fast).await.status, TransferStatus::Done);
    let failed = settled(&queue, missing).await;
    assert_eq!(failed.status, TransferStatus::Error);
    assert_eq!(failed.error_message.as_deref(), Some("not found"));
    wait_until(&queue, slow, |job| job.status == TransferStatus::Running).await;

    queue.clear_finished();

    let remaining = queue.snapshot();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, slow);
    assert_eq!(remaining[0].status, TransferStatus::Running);

    queue.cancel(slow);
    queue.clear_finished();
    assert!(queue.snapshot().is_empty());
    assert_eq!(queue.live_handles(), 0);
}

fn rank(status: TransferStatus) -> u8 {
    match status {
        TransferStatus::Queued => 0,
        TransferStatus::Running => 1,
        TransferStatus::Done | TransferStatus::Error | TransferStatus::Canceled => 2,
    }
}

#[tokio::test]
async fn observed_status_sequence_only_moves_forward() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fs/upload"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::new(&server.uri(), 900);
    let source = harness.local_file("a.txt", b"abc");
    let queue = harness.session.transfers();
    let mut rx = queue.subscribe();

    let id = queue.enqueue_upload(UploadSpec::new(source, "a.txt"));
    let observer = tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            let status = rx
                .borrow_and_update()
                .iter()
                .find(|job| job.id == id)
                .map(|job| job.status);
            if let Some(status) = status {
                if seen.last() != Some(&status) {
                    seen.push(status);
                }
                if status.is_terminal() {
                    break;
                }
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        seen
    });

    let seen = timeout(WAIT, observer).await.unwrap().unwrap();
    assert!(seen.windows(2).all(|pair| rank(pair[0]) < rank(pair[1])), "{seen:?}");
    assert_eq!(seen.last(), Some(&TransferStatus::Done));

    queue.cancel(id);
    assert_eq!(queue.get(id).unwrap().status, TransferStatus::Done);
}

/// Saves through a `DirectorySink` after a pause, so a cancel can land mid-save.
struct SlowSink {
    inner: DirectorySink,
    started: Arc<Notify>,
    saved: Arc<AtomicBool>,
}

impl DownloadSink for SlowSink {
    fn save(&self, file_name: &str, data: Bytes) -> std::io::Result<PathBuf> {
        self.started.notify_one();
        std::thread::sleep(Duration::from_millis(300));
        let saved = self.inner.save(file_name, data);
        self.saved.store(true, Ordering::SeqCst);
        saved
    }
}

#[tokio::test]
async fn cancel_during_save_leaves_no_file_behind() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fs/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::new(&server.uri(), 900);
    let started = Arc::new(Notify::new());
    let saved = Arc::new(AtomicBool::new(false));
    let queue = harness.session.transfers_into(Arc::new(SlowSink {
        inner: DirectorySink::new(harness.dir.path().join("downloads")),
        started: started.clone(),
        saved: saved.clone(),
    }));

    let id = queue.enqueue_download(DownloadSpec::new("late.bin"));
    timeout(WAIT, started.notified()).await.expect("save started");
    assert_eq!(queue.get(id).unwrap().bytes_transferred, 4);
    queue.cancel(id);

    let target = harness.downloaded("late.bin");
    timeout(WAIT, async {
        while !saved.load(Ordering::SeqCst) || target.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("saved file removed after cancel");
    assert_eq!(queue.get(id).unwrap().status, TransferStatus::Canceled);
    assert_eq!(queue.live_handles(), 0);
}
