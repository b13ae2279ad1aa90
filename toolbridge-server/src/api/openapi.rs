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

//! Public description routes, addressed by tenant hash. No auth: the hash
//! itself is the capability, and the document never contains tokens.

use super::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

/// GET /openapi/{hash}/json
pub async fn description_json(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let tenant = state
        .auth
        .tenant_from_hash(&hash)
        .ok_or(ApiError::TenantUnknown)?;
    let doc = state.descriptions.document(&tenant, &state.workers);
    Ok(Json(doc.as_ref().clone()))
}

/// GET /openapi/{hash}/yaml: the same document, YAML-serialized.
pub async fn description_yaml(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiError> {
    let tenant = state
        .auth
        .tenant_from_hash(&hash)
        .ok_or(ApiError::TenantUnknown)?;
    let doc = state.descriptions.document(&tenant, &state.workers);
    let yaml = serde_yaml::to_string(doc.as_ref())
        .map_err(|e| ApiError::Internal(format!("yaml serialization failed: {e}")))?;
    Ok((
        [(header::CONTENT_TYPE, "application/yaml; charset=utf-8")],
        yaml,
    )
        .into_response())
}
