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

//! Worker registry.
//!
//! Exclusive owner of worker records. All mutations go through the write
//! lock (single writer lane); readers take cloned snapshots and never hold
//! the lock across an await.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use toolbridge_core::{ConnectionState, ToolSchema, WorkerRecord};

pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

/// Outcome of a registration upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Session id the worker was connected under before this registration,
    /// if any. The caller closes it (claim-wins).
    pub replaced_session: Option<u64>,
    /// True when this id has never been seen in this process lifetime.
    pub first_registration: bool,
}

#[derive(Default)]
pub struct WorkerRegistry {
    records: RwLock<HashMap<String, WorkerRecord>>,
    next_seq: AtomicU64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session id the worker is currently connected under, if any.
    pub fn connected_session(&self, worker_id: &str) -> Option<u64> {
        let records = self.records.read();
        records
            .get(worker_id)
            .filter(|r| r.is_connected())
            .and_then(|r| r.session_id)
    }

    /// Transition the record to `connected`, replacing the tool list
    /// atomically and updating session id and last-seen. Records persist
    /// for the process lifetime; reconnects keep their original
    /// registration sequence so first-come-wins ordering is stable.
    pub fn upsert(
        &self,
        worker_id: &str,
        worker_token: &str,
        tools: Vec<ToolSchema>,
        session_id: u64,
    ) -> UpsertOutcome {
        let mut records = self.records.write();
        match records.get_mut(worker_id) {
            Some(record) => {
                let replaced_session = record
                    .session_id
                    .filter(|&sid| record.is_connected() && sid != session_id);
                record.worker_token = worker_token.to_string();
                record.tools = tools;
                record.state = ConnectionState::Connected;
                record.session_id = Some(session_id);
                record.last_seen_us = now_micros();
                UpsertOutcome {
                    replaced_session,
                    first_registration: false,
                }
            }
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                records.insert(
                    worker_id.to_string(),
                    WorkerRecord {
                        worker_id: worker_id.to_string(),
                        worker_token: worker_token.to_string(),
                        tools,
                        state: ConnectionState::Connected,
                        session_id: Some(session_id),
                        last_seen_us: now_micros(),
                        registered_seq: seq,
                    },
                );
                UpsertOutcome {
                    replaced_session: None,
                    first_registration: true,
                }
            }
        }
    }

    /// Mark the worker disconnected, but only while it is still bound to
    /// `session_id`. Guards against a stale close arriving after the
    /// session was replaced. Returns whether the record changed.
    pub fn mark_disconnected(&self, worker_id: &str, session_id: u64) -> bool {
        let mut records = self.records.write();
        match records.get_mut(worker_id) {
            Some(record) if record.session_id == Some(session_id) => {
                record.state = ConnectionState::Disconnected;
                record.session_id = None;
                record.last_seen_us = now_micros();
                true
            }
            _ => false,
        }
    }

    /// Refresh last-seen; any inbound session frame counts as liveness.
    pub fn touch(&self, worker_id: &str) {
        if let Some(record) = self.records.write().get_mut(worker_id) {
            record.last_seen_us = now_micros();
        }
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.records.read().get(worker_id).cloned()
    }

    /// Immutable view for the router, description generator and dashboard.
    pub fn snapshot(&self) -> Vec<WorkerRecord> {
        let mut records: Vec<WorkerRecord> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.registered_seq);
        records
    }

    pub fn connected_count(&self) -> usize {
        self.records.read().values().filter(|r| r.is_connected()).count()
    }

    pub fn known_count(&self) -> usize {
        self.records.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> Vec<ToolSchema> {
        names.iter().map(|n| ToolSchema::new(*n, "")).collect()
    }

    #[test]
    fn upsert_creates_then_updates() {
        let registry = WorkerRegistry::new();
        let outcome = registry.upsert("w1", "token-1", tools(&["echo"]), 1);
        assert!(outcome.first_registration);
        assert_eq!(outcome.replaced_session, None);

        let outcome = registry.upsert("w1", "token-1", tools(&["echo", "sum"]), 1);
        assert!(!outcome.first_registration);
        assert_eq!(outcome.replaced_session, None);

        let record = registry.get("w1").unwrap();
        assert_eq!(record.tools.len(), 2);
        assert!(record.is_connected());
    }

    #[test]
    fn upsert_reports_the_session_it_replaces() {
        let registry = WorkerRegistry::new();
        registry.upsert("w1", "token-1", tools(&["echo"]), 1);
        let outcome = registry.upsert("w1", "token-1", tools(&["echo"]), 2);
        assert_eq!(outcome.replaced_session, Some(1));
        assert_eq!(registry.connected_session("w1"), Some(2));
    }

    #[test]
    fn stale_disconnect_is_ignored_after_replacement() {
        let registry = WorkerRegistry::new();
        registry.upsert("w1", "token-1", tools(&["echo"]), 1);
        registry.upsert("w1", "token-1", tools(&["echo"]), 2);

        // The old session's close must not stomp the replacement.
        assert!(!registry.mark_disconnected("w1", 1));
        assert!(registry.get("w1").unwrap().is_connected());

        assert!(registry.mark_disconnected("w1", 2));
        let record = registry.get("w1").unwrap();
        assert!(!record.is_connected());
        assert_eq!(record.session_id, None);
    }

    #[test]
    fn records_survive_disconnect() {
        let registry = WorkerRegistry::new();
        registry.upsert("w1", "token-1", tools(&["echo"]), 1);
        registry.mark_disconnected("w1", 1);
        assert_eq!(registry.known_count(), 1);
        assert_eq!(registry.connected_count(), 0);
    }

    #[test]
    fn snapshot_orders_by_registration() {
        let registry = WorkerRegistry::new();
        registry.upsert("late", "token-b", tools(&[]), 2);
        registry.upsert("early", "token-a", tools(&[]), 1);
        // Reconnecting does not change the original ordering.
        registry.mark_disconnected("late", 2);
        registry.upsert("late", "token-b", tools(&[]), 3);

        let snapshot = registry.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|r| r.worker_id.as_str()).collect();
        assert_eq!(ids, ["late", "early"]);
    }
}
