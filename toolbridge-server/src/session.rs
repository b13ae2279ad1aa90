// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Worker session layer.
//!
//! Each WebSocket upgrade becomes one session: a reader loop plus a writer
//! task fed by an mpsc channel, so frames leaving a session are serialized.
//! The first frame must be `register`; afterwards the session relays
//! `tool_request`/`tool_response` traffic and exchanges keep-alive pings.
//!
//! Session ids are allocated from a process-wide counter and never reused.

use crate::api::AppState;
use crate::router::InvokeError;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use toolbridge_core::protocol::FrameError;
use toolbridge_core::{worker_id_for_token, SessionMessage, ToolSchema};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

/// What the writer task may be asked to put on the wire.
pub enum Outbound {
    Frame(SessionMessage),
    Close { reason: String },
}

struct SessionHandle {
    outbound: mpsc::Sender<Outbound>,
}

/// Tracks live sessions and owns their outbound lanes.
pub struct SessionManager {
    sessions: DashMap<u64, SessionHandle>,
    next_id: AtomicU64,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Allocate a fresh session and its outbound lane. The receiver half
    /// goes to the writer task (or a test double).
    pub fn open(&self) -> (u64, mpsc::Receiver<Outbound>) {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(64);
        self.sessions.insert(session_id, SessionHandle { outbound: tx });
        (session_id, rx)
    }

    pub fn is_active(&self, session_id: u64) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Queue a frame on the session's writer. False when the session is
    /// gone or its lane is closed.
    pub async fn send(&self, session_id: u64, msg: SessionMessage) -> bool {
        let Some(tx) = self
            .sessions
            .get(&session_id)
            .map(|handle| handle.outbound.clone())
        else {
            return false;
        };
        tx.send(Outbound::Frame(msg)).await.is_ok()
    }

    /// Ask the session to close with a normal-close reason and forget its
    /// handle so no further frames are accepted for it.
    pub async fn close(&self, session_id: u64, reason: &str) -> bool {
        let Some((_, handle)) = self.sessions.remove(&session_id) else {
            return false;
        };
        handle
            .outbound
            .send(Outbound::Close {
                reason: reason.to_string(),
            })
            .await
            .is_ok()
    }

    pub fn remove(&self, session_id: u64) {
        self.sessions.remove(&session_id);
    }

    pub async fn close_all(&self, reason: &str) {
        let ids: Vec<u64> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for session_id in ids {
            self.close(session_id, reason).await;
        }
    }
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("worker_token does not match the session bearer")]
    TokenMismatch,

    #[error("worker_id does not match the digest of worker_token")]
    IdMismatch,
}

fn id_prefix(worker_id: &str) -> &str {
    &worker_id[..worker_id.len().min(12)]
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

/// GET /ws: worker session upgrade. Rejected outright without a bearer.
pub async fn worker_session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let bearer = match crate::auth::bearer_token(&headers) {
        Ok(token) => token.to_string(),
        Err(err) => return err.into_response(),
    };
    ws.on_upgrade(move |socket| run_session(socket, state, bearer))
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

async fn run_session(socket: WebSocket, state: AppState, bearer: String) {
    let cfg = state.sessions.config().clone();
    let (session_id, mut outbound) = state.sessions.open();
    debug!(session_id, "worker session opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer half. Ends when the handle is dropped or a close is queued.
    let writer = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Frame(msg) => {
                    if ws_tx.send(Message::Text(msg.encode())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let mut registered: Option<String> = None;
    let handshake_deadline = Instant::now() + cfg.handshake_timeout;
    let mut ping_timer =
        tokio::time::interval_at(Instant::now() + cfg.ping_interval, cfg.ping_interval);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let pong_at = pong_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        tokio::select! {
            _ = tokio::time::sleep_until(handshake_deadline), if registered.is_none() => {
                warn!(session_id, "no register frame within the handshake window");
                state.sessions.close(session_id, "handshake timeout").await;
                break;
            }
            _ = ping_timer.tick(), if registered.is_some() => {
                if pong_deadline.is_none() {
                    let ping = SessionMessage::Ping { timestamp: now_millis() };
                    if !state.sessions.send(session_id, ping).await {
                        break;
                    }
                    pong_deadline = Some(Instant::now() + cfg.pong_timeout);
                }
            }
            _ = tokio::time::sleep_until(pong_at), if pong_deadline.is_some() => {
                warn!(session_id, "keep-alive expired without a pong");
                state.sessions.close(session_id, "keep-alive timeout").await;
                break;
            }
            next = ws_rx.next() => {
                match next {
                    Some(Ok(Message::Text(text))) => {
                        // Any inbound traffic counts as liveness.
                        pong_deadline = None;
                        if let Some(worker_id) = &registered {
                            state.workers.touch(worker_id);
                        }
                        if handle_text(&state, session_id, &bearer, &mut registered, &text).await
                            == Flow::Stop
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_)) | Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(session_id, "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(session_id, "session closed by peer");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(session_id, %err, "session read error");
                        break;
                    }
                }
            }
        }
    }

    finish_session(&state, session_id, registered.as_deref());
    let _ = writer.await;
}

async fn handle_text(
    state: &AppState,
    session_id: u64,
    bearer: &str,
    registered: &mut Option<String>,
    text: &str,
) -> Flow {
    let msg = match SessionMessage::parse(text) {
        Ok(msg) => msg,
        Err(FrameError::UnknownType(ty)) => {
            debug!(session_id, message_type = %ty, "ignoring unknown message type");
            let reply = SessionMessage::Error {
                code: "UNKNOWN_MESSAGE_TYPE".to_string(),
                message: format!("unsupported message type: {ty}"),
                request_id: None,
            };
            let _ = state.sessions.send(session_id, reply).await;
            return Flow::Continue;
        }
        Err(err) => {
            warn!(session_id, %err, "invalid session frame");
            let reply = SessionMessage::Error {
                code: "INVALID_PAYLOAD".to_string(),
                message: err.to_string(),
                request_id: None,
            };
            let _ = state.sessions.send(session_id, reply).await;
            if registered.is_none() {
                state.sessions.close(session_id, "invalid handshake").await;
                return Flow::Stop;
            }
            return Flow::Continue;
        }
    };

    // Nothing but register is accepted before registration completes.
    if registered.is_none() && !matches!(msg, SessionMessage::Register { .. }) {
        warn!(session_id, message_type = msg.message_type(), "frame before register");
        let reply = SessionMessage::Error {
            code: "INVALID_PAYLOAD".to_string(),
            message: "the first message must be register".to_string(),
            request_id: None,
        };
        let _ = state.sessions.send(session_id, reply).await;
        state.sessions.close(session_id, "register required").await;
        return Flow::Stop;
    }

    match msg {
        SessionMessage::Register {
            worker_id,
            worker_token,
            tools,
        } => match register_worker(state, session_id, bearer, &worker_id, &worker_token, tools)
            .await
        {
            Ok(()) => {
                *registered = Some(worker_id);
                Flow::Continue
            }
            Err(reject) => {
                warn!(session_id, %reject, "registration rejected");
                let reply = SessionMessage::Error {
                    code: "REGISTER_REJECTED".to_string(),
                    message: reject.to_string(),
                    request_id: None,
                };
                let _ = state.sessions.send(session_id, reply).await;
                state.sessions.close(session_id, "register rejected").await;
                Flow::Stop
            }
        },
        SessionMessage::Unregister { worker_id } => {
            if registered.as_deref() == Some(worker_id.as_str()) {
                state.sessions.close(session_id, "unregister").await;
                Flow::Stop
            } else {
                warn!(session_id, "unregister for a worker this session does not own");
                Flow::Continue
            }
        }
        SessionMessage::ToolResponse {
            request_id,
            result,
            error,
        } => {
            let outcome = match error {
                Some(message) => Err(message),
                None => Ok(result.unwrap_or(serde_json::Value::Null)),
            };
            state.router.complete(request_id, outcome);
            Flow::Continue
        }
        SessionMessage::Ping { timestamp } => {
            let _ = state
                .sessions
                .send(session_id, SessionMessage::Pong { timestamp })
                .await;
            Flow::Continue
        }
        SessionMessage::Pong { .. } => Flow::Continue,
        SessionMessage::Error {
            code,
            message,
            request_id,
        } => {
            warn!(session_id, code = %code, %message, "error frame from worker");
            if let Some(request_id) = request_id {
                state.router.complete(request_id, Err(message));
            }
            Flow::Continue
        }
        SessionMessage::ToolRequest { request_id, .. } => {
            let reply = SessionMessage::Error {
                code: "INVALID_PAYLOAD".to_string(),
                message: "tool_request only travels server to worker".to_string(),
                request_id: Some(request_id),
            };
            let _ = state.sessions.send(session_id, reply).await;
            Flow::Continue
        }
    }
}

/// Validate and commit a `register` frame.
///
/// Claim-wins: when the worker id is already connected under another
/// session, that session is closed and its pending invocations failed
/// before the new record is committed.
pub async fn register_worker(
    state: &AppState,
    session_id: u64,
    bearer: &str,
    worker_id: &str,
    worker_token: &str,
    tools: Vec<ToolSchema>,
) -> Result<(), RegisterError> {
    if !crate::auth::constant_time_eq(worker_token, bearer) {
        return Err(RegisterError::TokenMismatch);
    }
    if worker_id != worker_id_for_token(worker_token) {
        return Err(RegisterError::IdMismatch);
    }

    if let Some(previous) = state.workers.connected_session(worker_id) {
        if previous != session_id {
            info!(
                session_id,
                replaced = previous,
                worker = id_prefix(worker_id),
                "replacing existing worker session"
            );
            state.sessions.close(previous, "replaced").await;
            state
                .router
                .fail_for_session(previous, InvokeError::WorkerReplaced);
        }
    }

    let tool_count = tools.len();
    let outcome = state
        .workers
        .upsert(worker_id, worker_token, tools, session_id);
    if let Some(previous) = outcome.replaced_session {
        // Lost a race with a concurrent registration for the same id.
        state.sessions.close(previous, "replaced").await;
        state
            .router
            .fail_for_session(previous, InvokeError::WorkerReplaced);
    }

    if state.tenants.tenants_admitting(worker_token).is_empty() {
        warn!(
            worker = id_prefix(worker_id),
            "worker token is admitted by no api space; it will never be dispatched"
        );
    }

    state.descriptions.invalidate_all();
    info!(
        session_id,
        worker = id_prefix(worker_id),
        tools = tool_count,
        "worker connected"
    );
    Ok(())
}

/// Close-side bookkeeping shared by every exit path: forget the session,
/// mark the worker disconnected (session-id guarded), fail whatever was
/// still in flight through this session.
pub fn finish_session(state: &AppState, session_id: u64, worker_id: Option<&str>) {
    state.sessions.remove(session_id);
    if let Some(worker_id) = worker_id {
        if state.workers.mark_disconnected(worker_id, session_id) {
            state.descriptions.invalidate_all();
            info!(
                session_id,
                worker = id_prefix(worker_id),
                "worker disconnected"
            );
        }
    }
    state
        .router
        .fail_for_session(session_id, InvokeError::WorkerDisconnected);
}
