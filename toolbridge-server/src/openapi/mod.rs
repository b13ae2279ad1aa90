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

//! Per-tenant description generator.
//!
//! Derives an OpenAPI 3.0 document from the live worker snapshot, filtered
//! to one tenant. Documents are cached per tenant hash and the whole cache
//! is dropped on any worker registry mutation.

mod sanitize;

pub use sanitize::{sanitize_schema, truncate_description, MAX_DESCRIPTION_CHARS};

use crate::registry::WorkerRegistry;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use toolbridge_core::tenant::Tenant;
use toolbridge_core::{ToolSchema, WorkerRecord};

/// Constant tail of every tenant's `info.description`.
pub const DESCRIPTION_BLURB: &str =
    "Tool endpoints exposed by this api space. Every operation requires the api-space bearer token.";

#[derive(Debug, Clone)]
pub struct DocSettings {
    /// Prefix of `info.title`; the tenant name is appended.
    pub base_title: String,
    pub version: String,
    /// Public base URL for the servers block.
    pub server_url: String,
}

impl Default for DocSettings {
    fn default() -> Self {
        Self {
            base_title: "Toolbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            server_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// Cache of generated documents, keyed by tenant hash.
pub struct DescriptionCache {
    settings: DocSettings,
    docs: DashMap<String, Arc<Value>>,
}

impl DescriptionCache {
    pub fn new(settings: DocSettings) -> Self {
        Self {
            settings,
            docs: DashMap::new(),
        }
    }

    pub fn document(&self, tenant: &Tenant, workers: &WorkerRegistry) -> Arc<Value> {
        let key = tenant.token_hash();
        if let Some(doc) = self.docs.get(&key) {
            return doc.clone();
        }
        let doc = Arc::new(generate_description(
            tenant,
            &workers.snapshot(),
            &self.settings,
        ));
        self.docs.insert(key, doc.clone());
        doc
    }

    /// Any registry mutation invalidates every tenant's document.
    pub fn invalidate_all(&self) {
        self.docs.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.docs.len()
    }
}

/// Build the description document for one tenant from a registry snapshot.
pub fn generate_description(
    tenant: &Tenant,
    workers: &[WorkerRecord],
    settings: &DocSettings,
) -> Value {
    let mut admitted: Vec<&WorkerRecord> = workers
        .iter()
        .filter(|w| w.is_connected() && tenant.admits(&w.worker_token))
        .collect();
    admitted.sort_by_key(|w| w.registered_seq);

    let mut paths = Map::new();
    let mut seen = HashSet::new();
    for worker in admitted {
        for tool in &worker.tools {
            // First-registered-still-connected worker owns the name.
            if !seen.insert(tool.name.clone()) {
                continue;
            }
            paths.insert(
                format!("/api/tools/{}", tool.name),
                json!({ "post": tool_operation(tool) }),
            );
        }
    }

    let info_description = match tenant.description.as_deref() {
        Some(desc) => format!("{}\n\n{}", truncate_description(desc), DESCRIPTION_BLURB),
        None => DESCRIPTION_BLURB.to_string(),
    };

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": format!("{} - {}", settings.base_title, tenant.name),
            "version": settings.version,
            "description": info_description,
        },
        "servers": [{ "url": settings.server_url }],
        "paths": paths,
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer" }
            },
            "schemas": {
                "Error": {
                    "type": "object",
                    "properties": {
                        "error": { "type": "string" },
                        "code": { "type": "string" }
                    },
                    "required": ["error", "code"]
                }
            }
        },
        "security": [{ "bearerAuth": [] }]
    })
}

fn tool_operation(tool: &ToolSchema) -> Value {
    let result_schema = tool
        .output_schema
        .as_ref()
        .map(sanitize_schema)
        .unwrap_or_else(|| json!({ "type": "object" }));

    json!({
        "operationId": tool.name,
        "description": truncate_description(&tool.description),
        "x-openai-isConsequential": false,
        "requestBody": {
            "required": false,
            "content": {
                "application/json": {
                    "schema": sanitize_schema(&tool.input_schema)
                }
            }
        },
        "responses": {
            "200": {
                "description": "Tool result",
                "content": {
                    "application/json": {
                        "schema": {
                            "type": "object",
                            "properties": { "result": result_schema }
                        }
                    }
                }
            },
            "400": error_response(),
            "404": error_response(),
            "500": error_response(),
        }
    })
}

fn error_response() -> Value {
    json!({
        "description": "Error",
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/Error" }
            }
        }
    })
}
