use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waypoint_core::{ApiEndpoints, parse_change_paths};

use crate::error::AuthError;
use crate::token_provider::TokenProvider;

const CHANNEL_CAPACITY: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("invalid events url: {0}")]
    Url(#[from] url::ParseError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
}

/// Connects to the server's change feed.
///
/// A subscription ends when the socket closes; reconnecting is up to the caller.
pub struct EventListener {
    endpoints: ApiEndpoints,
    tokens: TokenProvider,
}

impl EventListener {
    pub fn new(endpoints: ApiEndpoints, tokens: TokenProvider) -> Self {
        Self { endpoints, tokens }
    }

    pub async fn connect(&self) -> Result<EventSubscription, EventError> {
        let token = self.tokens.valid_access_token().await?;
        let url = self.endpoints.events_url(&token)?;
        let (socket, _) = connect_async(url.as_str()).await?;
        info!(host = url.host_str().unwrap_or_default(), "change feed connected");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(socket, tx, cancel.clone()));
        Ok(EventSubscription {
            paths: rx,
            cancel,
            task,
        })
    }
}

pub struct EventSubscription {
    paths: mpsc::Receiver<Vec<String>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EventSubscription {
    /// Next batch of changed paths; `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<Vec<String>> {
        self.paths.recv().await
    }

    pub async fn close(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn pump(mut socket: Socket, tx: mpsc::Sender<Vec<String>>, cancel: CancellationToken) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = socket.close(None).await;
                break;
            }
            message = socket.next() => message,
        };
        match message {
            Some(Ok(WsMessage::Text(text))) => {
                let paths = parse_change_paths(&text);
                if paths.is_empty() {
                    continue;
                }
                if tx.send(paths).await.is_err() {
                    let _ = socket.close(None).await;
                    break;
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                debug!(frame = ?frame, "change feed closed by server");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(error = %err, "change feed error");
                break;
            }
            None => break,
        }
    }
    info!("change feed stopped");
}

/// Whether any changed path should trigger a reload of `folder`'s listing.
///
/// An empty path means "something changed" and always counts; at the root every
/// change counts.
pub fn affects_folder(paths: &[String], folder: &str) -> bool {
    let folder = folder.trim_end_matches('/');
    if folder.is_empty() {
        return !paths.is_empty();
    }
    let prefix = format!("{folder}/");
    paths
        .iter()
        .any(|path| path.is_empty() || path == folder || path.starts_with(&prefix))
}
