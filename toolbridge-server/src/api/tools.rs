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

//! Tool invocation endpoint.

use super::{ApiError, AppState};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use toolbridge_core::tenant::Tenant;
use tracing::debug;

/// POST /api/tools/{name}
///
/// The body is a JSON object of named arguments, or empty. Query
/// parameters merge into the argument object; body keys win on conflict.
pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Extension(tenant): Extension<Arc<Tenant>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let args = merge_args(&query, &body)?;
    debug!(tenant = %tenant.name, tool = %name, "tool invocation accepted");
    let result = state.router.invoke(&tenant, &name, Value::Object(args)).await?;
    Ok(Json(json!({ "result": result })))
}

fn merge_args(
    query: &HashMap<String, String>,
    body: &[u8],
) -> Result<Map<String, Value>, ApiError> {
    let mut args: Map<String, Value> = query
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();

    if !body.is_empty() {
        let parsed: Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::InvalidPayload(format!("body is not valid JSON: {e}")))?;
        match parsed {
            Value::Object(obj) => {
                for (key, value) in obj {
                    args.insert(key, value);
                }
            }
            Value::Null => {}
            _ => {
                return Err(ApiError::InvalidPayload(
                    "arguments must be a JSON object".to_string(),
                ))
            }
        }
    }

    Ok(args)
}
