use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::IF_MATCH;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use waypoint_core::{ApiEndpoints, Route};

use super::{DownloadSink, DownloadSpec, ProgressFn, UploadSpec};
use crate::error::{ApiError, check_status};
use crate::executor::{ApiExecutor, ApiRequest};
use crate::token_provider::TokenProvider;

/// Runs a single upload or download, observing `cancel` at every suspension point.
pub struct TransferRunner {
    http: Client,
    endpoints: ApiEndpoints,
    tokens: TokenProvider,
    executor: ApiExecutor,
    sink: Arc<dyn DownloadSink>,
    buffered_downloads: bool,
}

impl TransferRunner {
    pub fn new(
        http: Client,
        endpoints: ApiEndpoints,
        tokens: TokenProvider,
        executor: ApiExecutor,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        Self {
            http,
            endpoints,
            tokens,
            executor,
            sink,
            buffered_downloads: false,
        }
    }

    pub fn with_buffered_downloads(mut self, buffered: bool) -> Self {
        self.buffered_downloads = buffered;
        self
    }

    /// Streams a multipart upload.
    ///
    /// The token is made fresh before the first byte goes out: a 401 halfway through
    /// a stream cannot be replayed, so this path never retries.
    pub async fn upload(
        &self,
        spec: &UploadSpec,
        cancel: &CancellationToken,
        progress: ProgressFn,
    ) -> Result<(), ApiError> {
        let token = until_canceled(cancel, self.tokens.valid_access_token()).await??;

        let file = tokio::fs::File::open(&spec.local_path).await?;
        let total = file.metadata().await?.len();
        progress(0, Some(total));

        let report = progress.clone();
        let mut sent = 0u64;
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                report(sent, Some(total));
            }
            chunk
        });
        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(spec.display_name())
            .mime_str("application/octet-stream")
            .map_err(ApiError::Network)?;

        let url = self.endpoints.route(Route::Upload {
            path: &spec.remote_path,
            overwrite: spec.overwrite,
        })?;
        let mut request = self
            .http
            .post(url)
            .bearer_auth(&token)
            .multipart(Form::new().part("file", part));
        if let Some(etag) = &spec.if_match {
            request = request.header(IF_MATCH, etag);
        }

        debug!(path = %spec.remote_path, bytes = total, "upload started");
        let response = until_canceled(cancel, request.send())
            .await?
            .map_err(|err| classify(err, cancel))?;
        check_status(response).await?;
        info!(path = %spec.remote_path, bytes = total, "upload finished");
        Ok(())
    }

    /// Reads the body incrementally and hands the bytes to the sink once complete.
    pub async fn download(
        &self,
        spec: &DownloadSpec,
        cancel: &CancellationToken,
        progress: ProgressFn,
    ) -> Result<PathBuf, ApiError> {
        let request = ApiRequest::route(Route::Download {
            path: &spec.remote_path,
        });
        let response = until_canceled(cancel, self.executor.execute_checked(&request)).await??;
        let total = response.content_length();
        debug!(path = %spec.remote_path, total = ?total, "download started");

        let data = if self.buffered_downloads {
            let body = until_canceled(cancel, response.bytes())
                .await?
                .map_err(|err| classify(err, cancel))?;
            progress(body.len() as u64, total);
            body
        } else {
            let mut stream = response.bytes_stream();
            let mut buffer = BytesMut::new();
            while let Some(chunk) = until_canceled(cancel, stream.next()).await? {
                let chunk = chunk.map_err(|err| classify(err, cancel))?;
                buffer.extend_from_slice(&chunk);
                progress(buffer.len() as u64, total);
            }
            buffer.freeze()
        };

        if cancel.is_cancelled() {
            return Err(ApiError::Canceled);
        }
        let saved = self.persist(&spec.display_name, data).await?;
        info!(path = %spec.remote_path, saved = %saved.display(), "download finished");
        Ok(saved)
    }

    async fn persist(&self, file_name: &str, data: Bytes) -> Result<PathBuf, ApiError> {
        let sink = self.sink.clone();
        let file_name = file_name.to_string();
        let saved = tokio::task::spawn_blocking(move || sink.save(&file_name, data))
            .await
            .map_err(io::Error::other)??;
        Ok(saved)
    }
}

async fn until_canceled<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, ApiError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Canceled),
        output = future => Ok(output),
    }
}

/// A transport error that surfaces after cancellation is the cancellation itself.
fn classify(err: reqwest::Error, cancel: &CancellationToken) -> ApiError {
    if cancel.is_cancelled() {
        ApiError::Canceled
    } else {
        ApiError::Network(err)
    }
}
