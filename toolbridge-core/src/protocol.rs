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

//! Session wire protocol.
//!
//! One UTF-8 JSON object per frame; framing rides on the transport's
//! message boundaries (WebSocket text messages). The protocol is a closed
//! set of message variants expressed as a tagged sum.

use crate::tool::ToolSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every frame that may cross a worker session, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    /// worker → server; must be the first frame on a fresh session.
    Register {
        worker_id: String,
        worker_token: String,
        #[serde(default)]
        tools: Vec<ToolSchema>,
    },
    /// worker → server; voluntary disconnect.
    Unregister { worker_id: String },
    /// server → worker; correlated by `request_id`.
    ToolRequest {
        request_id: u64,
        tool_name: String,
        args: serde_json::Value,
    },
    /// worker → server; exactly one of `result` / `error` is set.
    ToolResponse {
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no \"type\" field")]
    MissingType,

    /// The type tag is outside the closed variant set. Spec'd handling:
    /// answer with an `error` frame, otherwise ignore.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("malformed {0} frame: {1}")]
    Malformed(String, String),
}

impl SessionMessage {
    const KNOWN_TYPES: [&'static str; 7] = [
        "register",
        "unregister",
        "tool_request",
        "tool_response",
        "ping",
        "pong",
        "error",
    ];

    /// Parse one frame, distinguishing unknown message types (which the
    /// session layer tolerates) from malformed ones (which it does not).
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| FrameError::Json(e.to_string()))?;
        let obj = value.as_object().ok_or(FrameError::NotAnObject)?;
        let ty = obj
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(FrameError::MissingType)?
            .to_string();
        if !Self::KNOWN_TYPES.contains(&ty.as_str()) {
            return Err(FrameError::UnknownType(ty));
        }
        serde_json::from_value(value).map_err(|e| FrameError::Malformed(ty, e.to_string()))
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":"ENCODE_FAILED","message":"frame serialization failed"}"#
                .to_string()
        })
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            SessionMessage::Register { .. } => "register",
            SessionMessage::Unregister { .. } => "unregister",
            SessionMessage::ToolRequest { .. } => "tool_request",
            SessionMessage::ToolResponse { .. } => "tool_response",
            SessionMessage::Ping { .. } => "ping",
            SessionMessage::Pong { .. } => "pong",
            SessionMessage::Error { .. } => "error",
        }
    }
}
