use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use spaceshare_core::protocol::{ClientFrame, ServerFrame, SpaceEvent, WS_SUBPROTOCOL};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::hub::DEFAULT_POLL_INTERVAL;

/// How long a push connection has to confirm the join before the feed
/// settles for polling.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(3);

const FEED_CHANNEL_SIZE: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid frame: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("join rejected: {0}")]
    Rejected(String),
    #[error("connection closed before join was confirmed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Realtime endpoint, e.g. `ws://host/api/v1/realtime`.
    pub endpoint: Url,
    pub token: String,
    pub space_id: Uuid,
    pub push_timeout: Duration,
    pub poll_interval: Duration,
}

impl FeedConfig {
    #[must_use]
    pub fn new(endpoint: Url, token: impl Into<String>, space_id: Uuid) -> Self {
        Self {
            endpoint,
            token: token.into(),
            space_id,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Push,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    Event(SpaceEvent),
    /// Refetch the space's full state.
    Refresh,
}

/// Change feed for one space that prefers push and degrades to polling.
///
/// The feed is always in exactly one mode. If the push connection does not
/// confirm the join within `push_timeout`, or drops later, the feed switches
/// to emitting [`FeedUpdate::Refresh`] every `poll_interval`.
pub struct SpaceFeed {
    mode: watch::Receiver<FeedMode>,
    updates: mpsc::Receiver<FeedUpdate>,
    task: JoinHandle<()>,
}

impl SpaceFeed {
    pub async fn start(config: FeedConfig) -> Self {
        let socket = match tokio::time::timeout(config.push_timeout, connect_push(&config)).await {
            Ok(Ok(socket)) => Some(socket),
            Ok(Err(error)) => {
                warn!(space_id = %config.space_id, %error, "push unavailable, polling");
                None
            }
            Err(_) => {
                warn!(space_id = %config.space_id, "push not confirmed in time, polling");
                None
            }
        };

        let initial = if socket.is_some() {
            FeedMode::Push
        } else {
            FeedMode::Poll
        };
        let (mode_tx, mode) = watch::channel(initial);
        let (updates_tx, updates) = mpsc::channel(FEED_CHANNEL_SIZE);
        let task = tokio::spawn(drive(socket, config, mode_tx, updates_tx));

        Self {
            mode,
            updates,
            task,
        }
    }

    #[must_use]
    pub fn mode(&self) -> FeedMode {
        *self.mode.borrow()
    }

    /// Waits until the feed switches to `mode`.
    pub async fn wait_for_mode(&mut self, mode: FeedMode) {
        let _ = self.mode.wait_for(|current| *current == mode).await;
    }

    pub async fn next(&mut self) -> Option<FeedUpdate> {
        self.updates.recv().await
    }
}

impl Drop for SpaceFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    socket: Option<Socket>,
    config: FeedConfig,
    mode: watch::Sender<FeedMode>,
    updates: mpsc::Sender<FeedUpdate>,
) {
    if let Some(socket) = socket {
        pump_events(socket, config.space_id, &updates).await;
        if updates.is_closed() {
            return;
        }
        debug!(space_id = %config.space_id, "push channel lost, switching to polling");
        mode.send_replace(FeedMode::Poll);
        // Events may have been missed while the socket was going down.
        if updates.send(FeedUpdate::Refresh).await.is_err() {
            return;
        }
    }

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.tick().await; // first tick fires immediately, skip it
    loop {
        ticker.tick().await;
        if updates.send(FeedUpdate::Refresh).await.is_err() {
            return;
        }
    }
}

async fn connect_push(config: &FeedConfig) -> Result<Socket, FeedError> {
    let mut request = config.endpoint.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(WS_SUBPROTOCOL));
    let (mut socket, _response) = connect_async(request).await?;

    send_frame(
        &mut socket,
        &ClientFrame::Auth {
            token: config.token.clone(),
        },
    )
    .await?;
    send_frame(
        &mut socket,
        &ClientFrame::Join {
            space: config.space_id,
        },
    )
    .await?;

    while let Some(message) = socket.next().await {
        let Message::Text(text) = message? else {
            continue;
        };
        match serde_json::from_str::<ServerFrame>(text.as_str())? {
            ServerFrame::Joined { space } if space == config.space_id => return Ok(socket),
            ServerFrame::Error { message, .. } => return Err(FeedError::Rejected(message)),
            _ => {}
        }
    }
    Err(FeedError::Closed)
}

async fn send_frame(socket: &mut Socket, frame: &ClientFrame) -> Result<(), FeedError> {
    let encoded = serde_json::to_string(frame)?;
    socket.send(Message::Text(encoded.into())).await?;
    Ok(())
}

/// Forwards events for `space_id` until the socket ends or the space is left.
async fn pump_events(mut socket: Socket, space_id: Uuid, updates: &mpsc::Sender<FeedUpdate>) {
    while let Some(message) = socket.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        match serde_json::from_str::<ServerFrame>(text.as_str()) {
            Ok(ServerFrame::Event { space, event }) if space == space_id => {
                if updates.send(FeedUpdate::Event(event)).await.is_err() {
                    break;
                }
            }
            Ok(ServerFrame::Left { space }) if space == space_id => break,
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "ignoring undecodable realtime frame");
            }
        }
    }
    let _ = socket.close(None).await;
}
