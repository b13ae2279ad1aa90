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

pub mod admin;
pub mod health;
pub mod openapi;
pub mod tools;

use crate::auth::{AdminAuth, BearerAuth};
use crate::logs::LogHub;
use crate::openapi::DescriptionCache;
use crate::registry::WorkerRegistry;
use crate::router::{InvocationRouter, InvokeError};
use crate::session::SessionManager;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use toolbridge_core::tenant::TenantRegistry;

/// Shared application state, passed by handle into every handler. No
/// process-wide singletons.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantRegistry>,
    pub workers: Arc<WorkerRegistry>,
    pub sessions: Arc<SessionManager>,
    pub router: Arc<InvocationRouter>,
    pub descriptions: Arc<DescriptionCache>,
    pub auth: Arc<BearerAuth>,
    pub admin: Arc<AdminAuth>,
    pub logs: Arc<LogHub>,
    pub started_at: Instant,
}

/// API error type. Every non-2xx from `/api/*` serializes as
/// `{"error": <human>, "code": <STABLE_CODE>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing Authorization header")]
    MissingAuthHeader,

    #[error("malformed Authorization header")]
    InvalidAuthHeader,

    #[error("unknown bearer token")]
    UnknownToken,

    #[error("this token does not grant access to this endpoint")]
    Forbidden,

    #[error("no api space matches this hash")]
    TenantUnknown,

    #[error("Tool {0} not found in this api space")]
    ToolNotFound(String),

    #[error("{0}")]
    ToolExecution(String),

    #[error("tool invocation timed out")]
    Timeout,

    #[error("worker disconnected before replying")]
    WorkerDisconnected,

    #[error("worker session was replaced before replying")]
    WorkerReplaced,

    #[error("invalid request payload: {0}")]
    InvalidPayload(String),

    #[error("server is shutting down")]
    ServerShutdown,

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingAuthHeader | ApiError::InvalidAuthHeader => StatusCode::UNAUTHORIZED,
            ApiError::UnknownToken | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::TenantUnknown | ApiError::ToolNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ToolExecution(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::WorkerDisconnected | ApiError::WorkerReplaced => StatusCode::BAD_GATEWAY,
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::ServerShutdown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingAuthHeader => "MISSING_AUTH_HEADER",
            ApiError::InvalidAuthHeader => "INVALID_AUTH_HEADER",
            ApiError::UnknownToken => "UNKNOWN_TOKEN",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::TenantUnknown => "TENANT_UNKNOWN",
            ApiError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            ApiError::ToolExecution(_) => "TOOL_EXECUTION_ERROR",
            ApiError::Timeout => "TIMEOUT",
            ApiError::WorkerDisconnected => "WORKER_DISCONNECTED",
            ApiError::WorkerReplaced => "WORKER_REPLACED",
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::ServerShutdown => "SERVER_SHUTDOWN",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.to_string(), "code": self.code() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<InvokeError> for ApiError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::ToolNotFound(name) => ApiError::ToolNotFound(name),
            InvokeError::Execution(message) => ApiError::ToolExecution(message),
            InvokeError::Timeout => ApiError::Timeout,
            InvokeError::WorkerDisconnected => ApiError::WorkerDisconnected,
            InvokeError::WorkerReplaced => ApiError::WorkerReplaced,
            InvokeError::ServerShutdown => ApiError::ServerShutdown,
        }
    }
}
