use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use spaceshare_auth::AuthContext;
use spaceshare_core::protocol::{
    ClientFrame, DeliveryStrategy, RealtimeStrategyInfo, ServerFrame, ERR_CODE_FORBIDDEN,
    ERR_CODE_INTERNAL, ERR_CODE_UNAVAILABLE,
};
use spaceshare_realtime::ws::{
    authenticate_first_message, parse_client_frame, CloseDirective, FirstMessage, WS_SUBPROTOCOL,
};
use spaceshare_realtime::{ConnectionId, HubError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ApiState;

mod session;

use session::{ConnectionSubscriber, OutboundFrame};

/// Interval between server pings.
const WS_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Client frames are small JSON control messages.
const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024;
/// How long an evicted writer may keep flushing before the socket is dropped.
const WS_EVICTION_GRACE: Duration = Duration::from_secs(5);

pub(crate) async fn strategy(State(state): State<ApiState>) -> Json<RealtimeStrategyInfo> {
    Json(state.hub.describe())
}

pub(crate) async fn websocket_upgrade(
    State(state): State<ApiState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if state.hub.strategy() == DeliveryStrategy::Poll {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !requested_subprotocol(&headers) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    ws.protocols([WS_SUBPROTOCOL])
        .max_frame_size(WS_MAX_MESSAGE_SIZE)
        .max_message_size(WS_MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| serve_websocket(socket, state))
        .into_response()
}

fn requested_subprotocol(headers: &HeaderMap) -> bool {
    headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == WS_SUBPROTOCOL)
        })
}

async fn serve_websocket(socket: WebSocket, state: ApiState) {
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let (outbound, mut outbound_rx) = session::outbound_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let writer_closed = Arc::clone(&closed);
    let (eviction, mut reader_eviction) = session::eviction_signal();
    let mut writer_eviction = reader_eviction.clone();

    let mut writer = tokio::spawn(async move {
        let mut keepalive = tokio::time::interval(WS_KEEPALIVE_INTERVAL);
        keepalive.tick().await;
        loop {
            tokio::select! {
                () = session::evicted(&mut writer_eviction) => {
                    let close = CloseDirective::slow_consumer();
                    let frame = CloseFrame {
                        code: close.code as u16,
                        reason: close.reason.into(),
                    };
                    let _ = socket_sender.send(Message::Close(Some(frame))).await;
                    break;
                }
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    match frame {
                        OutboundFrame::Text(payload) => {
                            if socket_sender
                                .send(Message::Text(payload.as_ref().into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        OutboundFrame::Close(close) => {
                            let frame = CloseFrame {
                                code: close.code as u16,
                                reason: close.reason.into(),
                            };
                            let _ = socket_sender.send(Message::Close(Some(frame))).await;
                            break;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if socket_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        writer_closed.store(true, Ordering::Relaxed);
    });

    let auth = match read_auth(&state, &mut socket_receiver).await {
        Ok(auth) => auth,
        Err(close) => {
            session::send_close(&outbound, close).await;
            drop(outbound);
            let _ = writer.await;
            return;
        }
    };

    let subscriber = Arc::new(ConnectionSubscriber::new(
        auth.user_id,
        outbound.clone(),
        Arc::clone(&closed),
        eviction,
    ));
    let connection = match state.hub.connect(subscriber).await {
        Ok(connection) => connection,
        Err(error) => {
            let close = match error {
                HubError::TooManyConnections => CloseDirective::too_many_connections(),
                HubError::PushUnavailable | HubError::UnknownConnection => {
                    CloseDirective::protocol_error("push delivery unavailable")
                }
            };
            info!(user_id = %auth.user_id, error = %error, "rejected realtime connection");
            session::send_close(&outbound, close).await;
            drop(outbound);
            let _ = writer.await;
            return;
        }
    };
    debug!(user_id = %auth.user_id, %connection, "realtime connection opened");

    loop {
        let message = tokio::select! {
            message = socket_receiver.next() => match message {
                Some(Ok(message)) => message,
                Some(Err(_)) | None => break,
            },
            () = session::evicted(&mut reader_eviction) => break,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(_) => {
                session::send_close(
                    &outbound,
                    CloseDirective::protocol_error("expected text frame"),
                )
                .await;
                break;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let reply = match parse_client_frame(text.as_str()) {
            Ok(ClientFrame::Join { space }) => join_space(&state, connection, &auth, space).await,
            Ok(ClientFrame::Leave { space }) => {
                let _ = state.hub.unsubscribe(connection, space).await;
                ServerFrame::Left { space }
            }
            Ok(ClientFrame::Ping) => ServerFrame::Pong,
            Ok(ClientFrame::Auth { .. }) => {
                session::send_close(
                    &outbound,
                    CloseDirective::protocol_error("already authenticated"),
                )
                .await;
                break;
            }
            Err(close) => {
                session::send_close(&outbound, close).await;
                break;
            }
        };
        tokio::select! {
            () = session::send_frame(&outbound, &reply) => {}
            () = session::evicted(&mut reader_eviction) => break,
        }
    }

    if *reader_eviction.borrow() {
        warn!(user_id = %auth.user_id, %connection, "evicted realtime connection with a full queue");
    }
    state.hub.disconnect(connection).await;
    debug!(user_id = %auth.user_id, %connection, "realtime connection closed");
    closed.store(true, Ordering::Relaxed);
    drop(outbound);
    // A writer stuck on a peer that stopped reading is cut off.
    if tokio::time::timeout(WS_EVICTION_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

async fn read_auth(
    state: &ApiState,
    socket_receiver: &mut SplitStream<WebSocket>,
) -> Result<AuthContext, CloseDirective> {
    let first_message =
        match tokio::time::timeout(state.auth_timeout, socket_receiver.next()).await {
            Ok(Some(Ok(message))) => to_first_message(message),
            Ok(Some(Err(_)) | None) => FirstMessage::Closed,
            Err(_) => return Err(CloseDirective::auth_failed("auth timeout")),
        };

    authenticate_first_message(state.validator.as_ref(), first_message)
        .await
        .map_err(|error| error.close)
}

fn to_first_message(message: Message) -> FirstMessage {
    match message {
        Message::Text(text) => FirstMessage::Text(text.as_str().to_owned()),
        Message::Close(_) => FirstMessage::Closed,
        Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => FirstMessage::NonText,
    }
}

async fn join_space(
    state: &ApiState,
    connection: ConnectionId,
    auth: &AuthContext,
    space_id: Uuid,
) -> ServerFrame {
    match is_member(state, space_id, auth.user_id).await {
        Ok(true) => {}
        Ok(false) => {
            return error_frame(Some(space_id), ERR_CODE_FORBIDDEN, "not a member of this space")
        }
        Err(frame) => return frame,
    }

    if let Err(error) = state.hub.subscribe(connection, space_id).await {
        return error_frame(Some(space_id), ERR_CODE_UNAVAILABLE, &error.to_string());
    }

    // A removal racing the subscribe is caught by the second check.
    match is_member(state, space_id, auth.user_id).await {
        Ok(true) => ServerFrame::Joined { space: space_id },
        Ok(false) => {
            let _ = state.hub.unsubscribe(connection, space_id).await;
            error_frame(Some(space_id), ERR_CODE_FORBIDDEN, "not a member of this space")
        }
        Err(frame) => {
            let _ = state.hub.unsubscribe(connection, space_id).await;
            frame
        }
    }
}

async fn is_member(state: &ApiState, space_id: Uuid, user_id: Uuid) -> Result<bool, ServerFrame> {
    match state.storage.get_membership(space_id, user_id).await {
        Ok(membership) => Ok(membership.is_some()),
        Err(storage_error) => {
            error!(%space_id, %user_id, error = %storage_error, "membership lookup failed");
            Err(error_frame(
                Some(space_id),
                ERR_CODE_INTERNAL,
                "internal server error",
            ))
        }
    }
}

fn error_frame(space: Option<Uuid>, code: &str, message: &str) -> ServerFrame {
    ServerFrame::Error {
        space,
        code: code.to_owned(),
        message: message.to_owned(),
    }
}
