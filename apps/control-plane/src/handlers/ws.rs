//! WebSocket upgrade handlers. Both endpoints run the same shape of
//! duplex relay — a downstream task forwarding `EventBus` events plus a
//! keepalive ping, an upstream task reading client frames, and a select
//! that tears both down the moment either side closes — but differ in who
//! is allowed to connect and what an inbound frame does.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use breeze_domain_models::error::ApiError;
use breeze_domain_models::session::SignalingMessage;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::middleware::ApiErrorResponse;
use crate::services::event_bus::ControlPlaneEvent;
use crate::state::AppState;

use super::agents::{authenticate_agent, mtls_serial_header};

fn error_response(err: ApiError) -> Response {
    ApiErrorResponse::from(err).into_response()
}

const KEEPALIVE_INTERVAL_SECS: u64 = 25;

#[derive(Debug, Deserialize)]
pub struct AgentSocketQuery {
    auth_token: String,
    session: Option<Uuid>,
}

/// `/ws/agents/{agentId}`. The agent authenticates with its bearer token
/// as a query parameter (no `Authorization` header on a WS upgrade) and,
/// if mTLS is enforced, the reverse proxy's client-cert header.
pub async fn agent_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<AgentSocketQuery>,
    parts: Parts,
) -> Response {
    let device = match authenticate_agent(&state, &agent_id, &query.auth_token).await {
        Ok(device) => device,
        Err(e) => return error_response(e),
    };

    if state.config.mtls_enforced {
        if let Some(cert) = &device.certificate {
            if mtls_serial_header(&parts) != Some(cert.serial.as_str()) {
                return error_response(ApiError::Unauthenticated("client certificate serial mismatch".into()));
            }
        }
    }

    ws.on_upgrade(move |socket| run_agent_socket(socket, state, device.id, query.session))
        .into_response()
}

async fn run_agent_socket(socket: WebSocket, state: AppState, device_id: Uuid, session_id: Option<Uuid>) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.event_bus.subscribe();

    let downstream = tokio::spawn(async move {
        let mut keepalive = interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if sink.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
                received = events.recv() => {
                    match received {
                        Ok(ControlPlaneEvent::RemoteSignal { session_id: event_session, payload }) if Some(event_session) == session_id => {
                            if sink.send(Message::Text(payload.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, device_id = %device_id, "agent socket missed buffered events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    let state_for_upstream = state.clone();
    let upstream = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(session_id) = session_id {
                        if let Ok(signal) = serde_json::from_str::<SignalingMessage>(&text) {
                            relay_agent_signal(&state_for_upstream, session_id, signal).await;
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!(device_id = %device_id, error = %e, "agent socket read error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = downstream => {}
        _ = upstream => {}
    }
}

/// The agent side only ever posts `progress` and `end` signals over the
/// socket; `offer`/`answer`/`ice` are owner-only and arrive over the REST
/// endpoints instead, then get relayed to the agent via the event bus.
async fn relay_agent_signal(state: &AppState, session_id: Uuid, signal: SignalingMessage) {
    let now = Utc::now();
    let applied = match &signal {
        SignalingMessage::Progress { bytes_transferred } => state.sessions.record_progress(session_id, *bytes_transferred, now).await,
        SignalingMessage::End => state.sessions.end(session_id, breeze_domain_models::session::RemoteSessionStatus::Disconnected, now).await,
        _ => return,
    };
    if applied.is_ok() {
        publish_signal(state, session_id, &signal);
    }
}

fn publish_signal(state: &AppState, session_id: Uuid, signal: &SignalingMessage) {
    let payload = serde_json::to_value(signal).unwrap_or(serde_json::json!({}));
    state.event_bus.publish(ControlPlaneEvent::RemoteSignal { session_id, payload });
}

#[derive(Debug, Deserialize)]
pub struct RemoteSocketQuery {
    token: String,
}

/// `/ws/remote/{sessionId}`. Only the owning user may open this socket;
/// org-access alone is not enough, mirroring the REST signaling endpoints.
pub async fn remote_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<RemoteSocketQuery>,
) -> Response {
    let ctx = match crate::handlers::auth::context_from_query_token(&state, &query.token).await {
        Ok(ctx) => ctx,
        Err(e) => return error_response(e),
    };
    let session = match state.sessions.get(session_id).await {
        Ok(session) => session,
        Err(_) => return error_response(ApiError::not_found("remote_session")),
    };
    if !session.owned_by(ctx.actor.id) {
        return error_response(ApiError::not_found("remote_session"));
    }

    ws.on_upgrade(move |socket| run_remote_socket(socket, state, session_id)).into_response()
}

async fn run_remote_socket(socket: WebSocket, state: AppState, session_id: Uuid) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.event_bus.subscribe();

    let downstream = tokio::spawn(async move {
        let mut keepalive = interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if sink.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
                received = events.recv() => {
                    match received {
                        Ok(ControlPlaneEvent::RemoteSignal { session_id: event_session, payload }) if event_session == session_id => {
                            if sink.send(Message::Text(payload.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, session_id = %session_id, "remote socket missed buffered events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    let state_for_upstream = state.clone();
    let upstream = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Ok(signal) = serde_json::from_str::<SignalingMessage>(&text) {
                        relay_user_signal(&state_for_upstream, session_id, signal).await;
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!(session_id = %session_id, error = %e, "remote socket read error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = downstream => {}
        _ = upstream => {}
    }
}

async fn relay_user_signal(state: &AppState, session_id: Uuid, signal: SignalingMessage) {
    let now = Utc::now();
    let applied = match &signal {
        SignalingMessage::Offer { sdp } => state.sessions.apply_signal(session_id, Some(sdp), None, None, now).await,
        SignalingMessage::Answer { sdp } => state.sessions.apply_signal(session_id, None, Some(sdp), None, now).await,
        SignalingMessage::Ice { candidate } => state.sessions.apply_signal(session_id, None, None, Some(candidate), now).await,
        SignalingMessage::End => state.sessions.end(session_id, breeze_domain_models::session::RemoteSessionStatus::Disconnected, now).await,
        SignalingMessage::Progress { .. } => return,
    };
    if applied.is_ok() {
        publish_signal(state, session_id, &signal);
    }
}
