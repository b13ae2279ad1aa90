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

//! Invocation router.
//!
//! Correlates HTTP tool calls with worker replies. Each in-flight call is a
//! pending entry keyed by request id holding a one-shot completion slot;
//! `tool_response` frames, timeouts, session loss and client cancellation
//! all race to resolve it. The router never retries.

use crate::registry::WorkerRegistry;
use crate::session::SessionManager;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use toolbridge_core::tenant::Tenant;
use toolbridge_core::{sha256_hex, SessionMessage, WorkerRecord};
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    #[error("tool {0} not found in this api space")]
    ToolNotFound(String),

    /// The worker replied with an `error` frame; a transport event, not a
    /// server fault.
    #[error("{0}")]
    Execution(String),

    #[error("tool invocation timed out")]
    Timeout,

    #[error("worker disconnected before replying")]
    WorkerDisconnected,

    #[error("worker session was replaced before replying")]
    WorkerReplaced,

    #[error("server is shutting down")]
    ServerShutdown,
}

struct Pending {
    session_id: u64,
    slot: oneshot::Sender<Result<serde_json::Value, InvokeError>>,
}

pub struct InvocationRouter {
    workers: Arc<WorkerRegistry>,
    sessions: Arc<SessionManager>,
    pending: DashMap<u64, Pending>,
    next_request_id: AtomicU64,
    timeout: Duration,
}

impl InvocationRouter {
    pub fn new(
        workers: Arc<WorkerRegistry>,
        sessions: Arc<SessionManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            workers,
            sessions,
            pending: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Dispatch one tool call into the tenant's worker pool and await the
    /// correlated reply.
    pub async fn invoke(
        &self,
        tenant: &Tenant,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, InvokeError> {
        let candidates: Vec<WorkerRecord> = self
            .workers
            .snapshot()
            .into_iter()
            .filter(|w| {
                w.is_connected() && tenant.admits(&w.worker_token) && w.offers(tool_name)
            })
            .collect();

        let chosen = select_worker(&candidates, tenant)
            .ok_or_else(|| InvokeError::ToolNotFound(tool_name.to_string()))?;
        let session_id = chosen.session_id.ok_or(InvokeError::WorkerDisconnected)?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id,
            Pending {
                session_id,
                slot: tx,
            },
        );
        // Dropped without completing only when the HTTP caller goes away;
        // the worker's eventual reply is then discarded in complete().
        let guard = PendingGuard {
            router: self,
            request_id,
        };

        let frame = SessionMessage::ToolRequest {
            request_id,
            tool_name: tool_name.to_string(),
            args,
        };
        if !self.sessions.send(session_id, frame).await {
            self.pending.remove(&request_id);
            return Err(InvokeError::WorkerDisconnected);
        }

        debug!(
            request_id,
            session_id,
            tool = tool_name,
            worker = chosen.id_prefix(),
            "tool request dispatched"
        );

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => {
                std::mem::forget(guard);
                outcome
            }
            // Slot sender vanished without resolving; treat as session loss.
            Ok(Err(_)) => {
                std::mem::forget(guard);
                Err(InvokeError::WorkerDisconnected)
            }
            Err(_) => {
                self.pending.remove(&request_id);
                std::mem::forget(guard);
                warn!(request_id, tool = tool_name, "tool invocation timed out");
                Err(InvokeError::Timeout)
            }
        }
    }

    /// Resolve a pending invocation with the worker's reply. Late replies
    /// (timed out, cancelled, or never dispatched) are logged and dropped.
    pub fn complete(&self, request_id: u64, outcome: Result<serde_json::Value, String>) {
        match self.pending.remove(&request_id) {
            Some((_, pending)) => {
                let resolved = outcome.map_err(InvokeError::Execution);
                if pending.slot.send(resolved).is_err() {
                    debug!(request_id, "reply arrived after the caller went away");
                }
            }
            None => warn!(request_id, "late or unknown tool_response discarded"),
        }
    }

    /// Fail every pending invocation routed through one session.
    pub fn fail_for_session(&self, session_id: u64, error: InvokeError) {
        let request_ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| *entry.key())
            .collect();
        for request_id in request_ids {
            if let Some((_, pending)) = self.pending.remove(&request_id) {
                let _ = pending.slot.send(Err(error.clone()));
            }
        }
    }

    /// Fail everything; shutdown path.
    pub fn fail_all(&self, error: InvokeError) {
        let request_ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for request_id in request_ids {
            if let Some((_, pending)) = self.pending.remove(&request_id) {
                let _ = pending.slot.send(Err(error.clone()));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Removes the pending entry when the HTTP caller is cancelled before the
/// invocation resolves. No cancel frame goes to the worker.
struct PendingGuard<'a> {
    router: &'a InvocationRouter,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.router.pending.remove(&self.request_id).is_some() {
            debug!(
                request_id = self.request_id,
                "pending invocation cancelled by client"
            );
        }
    }
}

/// Worker selection: stable affinity to the worker whose id matches the
/// tenant's own token digest, then earliest-registered.
pub fn select_worker<'a>(
    candidates: &'a [WorkerRecord],
    tenant: &Tenant,
) -> Option<&'a WorkerRecord> {
    if candidates.is_empty() {
        return None;
    }
    let affinity_id = sha256_hex(&tenant.bearer_token);
    candidates
        .iter()
        .find(|w| w.worker_id == affinity_id)
        .or_else(|| candidates.iter().min_by_key(|w| w.registered_seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolbridge_core::{ConnectionState, ToolSchema};

    fn tenant(token: &str) -> Tenant {
        Tenant {
            name: "t1".to_string(),
            description: None,
            bearer_token: token.to_string(),
            allowed_worker_tokens: vec![],
        }
    }

    fn record(worker_id: &str, seq: u64) -> WorkerRecord {
        WorkerRecord {
            worker_id: worker_id.to_string(),
            worker_token: format!("token-{worker_id}"),
            tools: vec![ToolSchema::new("echo", "")],
            state: ConnectionState::Connected,
            session_id: Some(seq),
            last_seen_us: 0,
            registered_seq: seq,
        }
    }

    #[test]
    fn selection_prefers_earliest_registered() {
        let candidates = vec![record("bbb", 5), record("aaa", 2), record("ccc", 9)];
        let chosen = select_worker(&candidates, &tenant("t-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"));
        assert_eq!(chosen.unwrap().worker_id, "aaa");
    }

    #[test]
    fn selection_prefers_token_affinity_over_age() {
        let token = "t-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let affinity_id = sha256_hex(token);
        let candidates = vec![record("aaa", 1), record(&affinity_id, 8)];
        let chosen = select_worker(&candidates, &tenant(token));
        assert_eq!(chosen.unwrap().worker_id, affinity_id);
    }

    #[test]
    fn selection_of_nothing_is_none() {
        assert!(select_worker(&[], &tenant("t-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")).is_none());
    }
}
