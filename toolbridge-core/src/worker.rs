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

//! Worker records.
//!
//! A record is created the first time a worker registers and is never
//! destroyed; only the session layer mutates it (via the worker registry).
//! Disconnected records stay around for dashboard history, but only
//! `Connected` ones count for dispatch and descriptions.

use crate::tool::ToolSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Live state for one worker, keyed by its stable id
/// (`sha256_hex(worker_token)`).
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub worker_token: String,
    /// Current tool list, keys unique by name, in announcement order.
    pub tools: Vec<ToolSchema>,
    pub state: ConnectionState,
    /// Present only while connected.
    pub session_id: Option<u64>,
    /// Microseconds since the Unix epoch.
    pub last_seen_us: u64,
    /// Monotonic sequence assigned at record creation; lower means the
    /// worker registered earlier (first-come-wins tiebreaks).
    pub registered_seq: u64,
}

impl WorkerRecord {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn offers(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t.name == tool_name)
    }

    pub fn tool(&self, tool_name: &str) -> Option<&ToolSchema> {
        self.tools.iter().find(|t| t.name == tool_name)
    }

    /// Short id for dashboards and logs; the full id is a 64-hex digest.
    pub fn id_prefix(&self) -> &str {
        &self.worker_id[..self.worker_id.len().min(12)]
    }
}
