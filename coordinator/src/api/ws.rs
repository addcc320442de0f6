use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State as AxumState,
    },
    http::{header::ORIGIN, HeaderMap, StatusCode},
    response::IntoResponse,
};
use drawcast_types::{ClientId, ControlEnvelope, DrawId, ErrorCode, ServerMessage};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use uuid::Uuid;

use crate::{Coordinator, PrizeStore, SessionHandle, WsConnectionGuard, WsConnectionRejection};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Controller,
    Display,
}

#[derive(Deserialize)]
pub(super) struct WsQuery {
    client_id: Option<String>,
    role: Option<String>,
}

type OutboundSender = mpsc::Sender<Message>;
type OutboundReceiver = mpsc::Receiver<Message>;

fn outbound_channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity)
}

/// Validates the WebSocket Origin header against allowed origins.
///
/// Default behavior (neither env var set): allow all connections.
/// With `ALLOWED_WS_ORIGINS` set: only those origins are allowed.
/// With `ALLOW_WS_NO_ORIGIN=0/false`: require an Origin header.
///
/// Consoles and displays running outside a browser send no Origin header, so
/// they are allowed by default unless explicitly restricted.
fn validate_origin(headers: &HeaderMap) -> bool {
    let allowed = std::env::var("ALLOWED_WS_ORIGINS").ok();
    let deny_no_origin = matches!(
        std::env::var("ALLOW_WS_NO_ORIGIN").as_deref(),
        Ok("0") | Ok("false") | Ok("FALSE") | Ok("no") | Ok("NO")
    );

    let origin = match headers.get(ORIGIN) {
        Some(o) => match o.to_str() {
            Ok(s) => s,
            Err(_) => {
                tracing::warn!("Invalid Origin header encoding");
                return false;
            }
        },
        None => {
            if deny_no_origin {
                tracing::warn!("WebSocket rejected: no Origin header and ALLOW_WS_NO_ORIGIN=false");
                return false;
            }
            return true;
        }
    };

    let Some(allowed) = allowed else {
        return true;
    };

    let allowed_list: Vec<&str> = allowed
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if allowed_list.is_empty() || allowed_list.contains(&"*") || allowed_list.contains(&origin) {
        return true;
    }

    tracing::warn!("WebSocket origin rejected: {} (allowed: {})", origin, allowed);
    false
}

pub(super) async fn session_ws<S: PrizeStore>(
    AxumState(coordinator): AxumState<Arc<Coordinator<S>>>,
    Path(draw_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !validate_origin(&headers) {
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let guard = match coordinator.try_acquire_ws_connection(addr.ip()) {
        Ok(guard) => guard,
        Err(reason) => {
            let message = match reason {
                WsConnectionRejection::GlobalLimit => "WebSocket connection limit reached",
                WsConnectionRejection::PerIpLimit => "WebSocket per-IP limit reached",
            };
            return (StatusCode::TOO_MANY_REQUESTS, message).into_response();
        }
    };

    let role = match query.role.as_deref() {
        Some("controller") => Role::Controller,
        Some("display") | None => Role::Display,
        Some(other) => {
            tracing::warn!("WebSocket rejected: unknown role {other:?}");
            return (StatusCode::BAD_REQUEST, "Unknown role").into_response();
        }
    };
    let client = ClientId::from(
        query
            .client_id
            .unwrap_or_else(|| Uuid::new_v4().to_string())
            .as_str(),
    );
    let draw = DrawId::from(draw_id.as_str());

    let max_message_bytes = coordinator.config().ws_max_message_bytes();
    ws.max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| handle_session_ws(socket, coordinator, draw, client, role, guard))
        .into_response()
}

async fn handle_session_ws<S: PrizeStore>(
    socket: WebSocket,
    coordinator: Arc<Coordinator<S>>,
    draw: DrawId,
    client: ClientId,
    role: Role,
    _guard: WsConnectionGuard<S>,
) {
    tracing::info!(draw = %draw, client = %client, "session WebSocket connected");
    let (mut sender, mut receiver) = socket.split();

    let session = coordinator.session(&draw).await;
    // Snapshot and subscription are taken in a single session turn, so the
    // snapshot plus the event stream reconstructs the exact live state.
    let (snapshot, mut events) = match session.subscribe().await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(draw = %draw, error = %err, "session subscribe failed");
            return;
        }
    };

    let (out_tx, mut out_rx) = outbound_channel(coordinator.config().ws_outbound_capacity());
    let send_timeout = coordinator.config().ws_send_timeout();
    let writer_coordinator = coordinator.clone();
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            match timeout(send_timeout, sender.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    writer_coordinator.ws_metrics().inc_send_error();
                    tracing::warn!("Failed to send frame, client disconnected");
                    break;
                }
                Err(_) => {
                    writer_coordinator.ws_metrics().inc_send_timeout();
                    tracing::warn!("WebSocket send timed out, closing connection");
                    break;
                }
            }
        }
        let _ = sender.close().await;
    });

    if enqueue_frame(&out_tx, &ServerMessage::Snapshot { session: snapshot }, &coordinator).is_err()
    {
        tracing::warn!("Failed to enqueue initial snapshot, closing connection");
        drop(out_tx);
        let _ = writer_handle.await;
        return;
    }

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if handle_incoming(
                            &text,
                            &session,
                            &client,
                            role,
                            &out_tx,
                            &coordinator,
                        )
                        .await
                        .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if enqueue_message(&out_tx, Message::Pong(data), &coordinator).is_err() {
                            tracing::warn!("Failed to enqueue pong, closing connection");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(draw = %draw, client = %client, "client closed WebSocket");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {:?}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if enqueue_frame(&out_tx, &ServerMessage::event(event), &coordinator)
                            .is_err()
                        {
                            tracing::warn!("Failed to enqueue event, closing connection");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // A lagged mirror has an unknown gap; a fresh snapshot
                        // restores convergence instead of replaying.
                        coordinator.ws_metrics().add_events_lagged(skipped);
                        tracing::warn!(
                            draw = %draw,
                            client = %client,
                            skipped,
                            "subscriber lagged; resyncing from snapshot"
                        );
                        match session.snapshot().await {
                            Ok(snapshot) => {
                                if enqueue_frame(
                                    &out_tx,
                                    &ServerMessage::Snapshot { session: snapshot },
                                    &coordinator,
                                )
                                .is_err()
                                {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!(draw = %draw, "session event channel closed");
                        break;
                    }
                }
            }
        }
    }
    tracing::info!(draw = %draw, client = %client, "session WebSocket handler exiting");
    drop(out_tx);
    let _ = writer_handle.await;
}

/// Parse and dispatch one inbound text frame. Rejections become unicast
/// error frames on this socket only; accepted actions surface through the
/// broadcast stream.
async fn handle_incoming<S: PrizeStore>(
    text: &str,
    session: &SessionHandle,
    client: &ClientId,
    role: Role,
    out_tx: &OutboundSender,
    coordinator: &Arc<Coordinator<S>>,
) -> Result<(), ()> {
    let envelope: ControlEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            coordinator.ws_metrics().inc_malformed_action();
            tracing::warn!(error = %err, "malformed control frame");
            return send_error(
                out_tx,
                coordinator,
                ErrorCode::InvalidState,
                "malformed control frame".to_string(),
            );
        }
    };
    if role != Role::Controller {
        return send_error(
            out_tx,
            coordinator,
            ErrorCode::InvalidState,
            "displays cannot send control actions".to_string(),
        );
    }
    match session.act(client.clone(), envelope.into_action()).await {
        Ok(()) => Ok(()),
        Err(err) => send_error(out_tx, coordinator, err.code(), err.to_string()),
    }
}

fn send_error<S: PrizeStore>(
    out_tx: &OutboundSender,
    coordinator: &Arc<Coordinator<S>>,
    code: ErrorCode,
    reason: String,
) -> Result<(), ()> {
    enqueue_frame(out_tx, &ServerMessage::Error { code, reason }, coordinator)
}

fn enqueue_frame<S: PrizeStore>(
    out_tx: &OutboundSender,
    frame: &ServerMessage,
    coordinator: &Arc<Coordinator<S>>,
) -> Result<(), ()> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize server frame");
            return Err(());
        }
    };
    enqueue_message(out_tx, Message::Text(text), coordinator)
}

fn enqueue_message<S: PrizeStore>(
    out_tx: &OutboundSender,
    message: Message,
    coordinator: &Arc<Coordinator<S>>,
) -> Result<(), ()> {
    match out_tx.try_send(message) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => {
            coordinator.ws_metrics().inc_queue_full();
            Err(())
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(()),
    }
}
