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

//! End-to-end dispatch tests over in-memory session lanes: registration,
//! routing, claim-wins replacement, disconnects and timeouts, without a
//! real socket in the loop.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use toolbridge_core::tenant::{Tenant, TenantRegistry};
use toolbridge_core::{worker_id_for_token, SessionMessage, ToolSchema};
use toolbridge_server::api::AppState;
use toolbridge_server::auth::{AdminAuth, BearerAuth};
use toolbridge_server::logs::LogHub;
use toolbridge_server::openapi::{DescriptionCache, DocSettings};
use toolbridge_server::registry::WorkerRegistry;
use toolbridge_server::router::{InvocationRouter, InvokeError};
use toolbridge_server::session::{
    finish_session, register_worker, Outbound, SessionConfig, SessionManager,
};

const TENANT_TOKEN: &str = "t-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const TENANT2_TOKEN: &str = "t-cccccccccccccccccccccccccccccc";
const WORKER_TOKEN: &str = "w-bbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const WORKER2_TOKEN: &str = "w-dddddddddddddddddddddddddddddd";
const ADMIN_TOKEN: &str = "adm-eeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

fn tenant(name: &str, token: &str, workers: &[&str]) -> Tenant {
    Tenant {
        name: name.to_string(),
        description: None,
        bearer_token: token.to_string(),
        allowed_worker_tokens: workers.iter().map(|t| t.to_string()).collect(),
    }
}

fn state_with(tenants: Vec<Tenant>, invoke_timeout: Duration) -> AppState {
    let tenants = Arc::new(TenantRegistry::new(tenants).unwrap());
    let workers = Arc::new(WorkerRegistry::new());
    let sessions = Arc::new(SessionManager::new(SessionConfig::default()));
    let router = Arc::new(InvocationRouter::new(
        workers.clone(),
        sessions.clone(),
        invoke_timeout,
    ));
    AppState {
        auth: Arc::new(BearerAuth::new(tenants.clone(), ADMIN_TOKEN.to_string())),
        admin: Arc::new(AdminAuth::new(ADMIN_TOKEN.to_string())),
        descriptions: Arc::new(DescriptionCache::new(DocSettings::default())),
        logs: LogHub::new(16),
        started_at: Instant::now(),
        tenants,
        workers,
        sessions,
        router,
    }
}

fn single_tenant_state(invoke_timeout: Duration) -> AppState {
    state_with(
        vec![tenant("T", TENANT_TOKEN, &[WORKER_TOKEN, WORKER2_TOKEN])],
        invoke_timeout,
    )
}

async fn connect_worker(
    state: &AppState,
    token: &str,
    tools: Vec<ToolSchema>,
) -> (u64, mpsc::Receiver<Outbound>) {
    let (session_id, rx) = state.sessions.open();
    register_worker(
        state,
        session_id,
        token,
        &worker_id_for_token(token),
        token,
        tools,
    )
    .await
    .unwrap();
    (session_id, rx)
}

/// Drive a worker session lane: answer every tool request with the given
/// reply builder, stop on close.
fn spawn_worker(
    state: &AppState,
    mut rx: mpsc::Receiver<Outbound>,
    reply: impl Fn(serde_json::Value) -> Result<serde_json::Value, String> + Send + 'static,
) {
    let router = state.router.clone();
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Frame(SessionMessage::ToolRequest {
                    request_id, args, ..
                }) => {
                    router.complete(request_id, reply(args));
                }
                Outbound::Frame(_) => {}
                Outbound::Close { .. } => break,
            }
        }
    });
}

fn echo_tool() -> ToolSchema {
    ToolSchema::new("echo", "Echo a message").with_input_schema(json!({
        "type": "object",
        "properties": { "msg": { "type": "string" } },
        "required": ["msg"]
    }))
}

#[tokio::test]
async fn invoke_round_trips_through_a_connected_worker() {
    let state = single_tenant_state(Duration::from_secs(5));
    let (_sid, rx) = connect_worker(&state, WORKER_TOKEN, vec![echo_tool()]).await;
    spawn_worker(&state, rx, |args| {
        Ok(json!({ "ok": true, "msg": args["msg"] }))
    });

    let tenant = state.tenants.get_by_token(TENANT_TOKEN).unwrap();
    let result = state
        .router
        .invoke(&tenant, "echo", json!({ "msg": "hi" }))
        .await
        .unwrap();
    assert_eq!(result, json!({ "ok": true, "msg": "hi" }));
}

#[tokio::test]
async fn disconnected_workers_are_not_dispatch_candidates() {
    let state = single_tenant_state(Duration::from_secs(5));
    let (session_id, _rx) = connect_worker(&state, WORKER_TOKEN, vec![echo_tool()]).await;
    let worker_id = worker_id_for_token(WORKER_TOKEN);
    finish_session(&state, session_id, Some(worker_id.as_str()));

    let tenant = state.tenants.get_by_token(TENANT_TOKEN).unwrap();
    let err = state
        .router
        .invoke(&tenant, "echo", json!({ "msg": "hi" }))
        .await
        .unwrap_err();
    assert_eq!(err, InvokeError::ToolNotFound("echo".to_string()));
}

#[tokio::test]
async fn duplicate_tool_dispatches_to_the_first_registered_worker() {
    let state = single_tenant_state(Duration::from_secs(5));
    let (_sid1, rx1) = connect_worker(&state, WORKER_TOKEN, vec![echo_tool()]).await;
    let (_sid2, rx2) = connect_worker(&state, WORKER2_TOKEN, vec![echo_tool()]).await;
    spawn_worker(&state, rx1, |_| Ok(json!({ "served_by": "first" })));
    spawn_worker(&state, rx2, |_| Ok(json!({ "served_by": "second" })));

    let tenant = state.tenants.get_by_token(TENANT_TOKEN).unwrap();
    let result = state
        .router
        .invoke(&tenant, "echo", json!({ "msg": "hi" }))
        .await
        .unwrap();
    assert_eq!(result, json!({ "served_by": "first" }));

    // The description also lists the duplicated name exactly once.
    let doc = state.descriptions.document(&tenant, &state.workers);
    let paths = doc["paths"].as_object().unwrap();
    assert_eq!(paths.len(), 1);
    assert!(paths.contains_key("/api/tools/echo"));
}

#[tokio::test]
async fn worker_error_frames_become_execution_errors() {
    let state = single_tenant_state(Duration::from_secs(5));
    let (_sid, rx) = connect_worker(&state, WORKER_TOKEN, vec![echo_tool()]).await;
    spawn_worker(&state, rx, |_| Err("bad input".to_string()));

    let tenant = state.tenants.get_by_token(TENANT_TOKEN).unwrap();
    let err = state
        .router
        .invoke(&tenant, "echo", json!({ "msg": "hi" }))
        .await
        .unwrap_err();
    assert_eq!(err, InvokeError::Execution("bad input".to_string()));
}

#[tokio::test]
async fn descriptions_are_scoped_per_tenant() {
    let state = state_with(
        vec![
            tenant("T1", TENANT_TOKEN, &[WORKER_TOKEN]),
            tenant("T2", TENANT2_TOKEN, &[WORKER2_TOKEN]),
        ],
        Duration::from_secs(5),
    );
    let (_sid1, _rx1) = connect_worker(
        &state,
        WORKER_TOKEN,
        vec![ToolSchema::new("lookup", "Find a record")],
    )
    .await;
    let (_sid2, _rx2) = connect_worker(
        &state,
        WORKER2_TOKEN,
        vec![ToolSchema::new("convert", "Convert a unit")],
    )
    .await;

    let t1 = state.tenants.get_by_token(TENANT_TOKEN).unwrap();
    let doc = state.descriptions.document(&t1, &state.workers);
    let paths = doc["paths"].as_object().unwrap();
    assert!(paths.contains_key("/api/tools/lookup"));
    assert!(!paths.contains_key("/api/tools/convert"));
    assert!(doc["info"]["title"].as_str().unwrap().ends_with("- T1"));

    let t2 = state.tenants.get_by_token(TENANT2_TOKEN).unwrap();
    let doc = state.descriptions.document(&t2, &state.workers);
    let paths = doc["paths"].as_object().unwrap();
    assert!(paths.contains_key("/api/tools/convert"));
    assert!(!paths.contains_key("/api/tools/lookup"));
}

#[tokio::test]
async fn second_registration_replaces_the_first_session() {
    let state = single_tenant_state(Duration::from_secs(5));
    let worker_id = worker_id_for_token(WORKER_TOKEN);
    let (sid1, mut rx1) = connect_worker(&state, WORKER_TOKEN, vec![echo_tool()]).await;

    // Dispatch into the first session but leave it unanswered.
    let tenant = state.tenants.get_by_token(TENANT_TOKEN).unwrap();
    let pending = {
        let router = state.router.clone();
        let tenant = tenant.clone();
        tokio::spawn(async move { router.invoke(&tenant, "echo", json!({ "msg": "hi" })).await })
    };
    // Let the invocation reach the first session's lane.
    let got_request = rx1.recv().await;
    assert!(matches!(
        got_request,
        Some(Outbound::Frame(SessionMessage::ToolRequest { .. }))
    ));

    let (sid2, _rx2) = connect_worker(&state, WORKER_TOKEN, vec![echo_tool()]).await;
    assert_ne!(sid1, sid2);

    // The registry now points at the second session, the first session was
    // told to close, and the in-flight invocation failed as replaced.
    assert_eq!(state.workers.connected_session(&worker_id), Some(sid2));
    assert!(!state.sessions.is_active(sid1));
    assert!(matches!(rx1.recv().await, Some(Outbound::Close { reason }) if reason == "replaced"));
    assert_eq!(pending.await.unwrap(), Err(InvokeError::WorkerReplaced));

    // A stale close from the replaced session must not disconnect the new one.
    finish_session(&state, sid1, Some(worker_id.as_str()));
    assert_eq!(state.workers.connected_session(&worker_id), Some(sid2));
}

#[tokio::test]
async fn session_loss_fails_inflight_invocations() {
    let state = single_tenant_state(Duration::from_secs(5));
    let worker_id = worker_id_for_token(WORKER_TOKEN);
    let (session_id, mut rx) = connect_worker(&state, WORKER_TOKEN, vec![echo_tool()]).await;

    let pending = {
        let router = state.router.clone();
        let tenant = state.tenants.get_by_token(TENANT_TOKEN).unwrap();
        tokio::spawn(async move { router.invoke(&tenant, "echo", json!({ "msg": "hi" })).await })
    };
    assert!(matches!(
        rx.recv().await,
        Some(Outbound::Frame(SessionMessage::ToolRequest { .. }))
    ));

    finish_session(&state, session_id, Some(worker_id.as_str()));
    assert_eq!(pending.await.unwrap(), Err(InvokeError::WorkerDisconnected));
    assert_eq!(state.router.pending_count(), 0);
}

#[tokio::test]
async fn unanswered_invocations_time_out_and_late_replies_are_dropped() {
    let state = single_tenant_state(Duration::from_millis(100));
    let (_sid, mut rx) = connect_worker(&state, WORKER_TOKEN, vec![echo_tool()]).await;

    let tenant = state.tenants.get_by_token(TENANT_TOKEN).unwrap();
    let err = state
        .router
        .invoke(&tenant, "echo", json!({ "msg": "hi" }))
        .await
        .unwrap_err();
    assert_eq!(err, InvokeError::Timeout);
    assert_eq!(state.router.pending_count(), 0);

    // The worker finally answers; the reply has nowhere to go and is
    // discarded without effect.
    let request_id = match rx.recv().await {
        Some(Outbound::Frame(SessionMessage::ToolRequest { request_id, .. })) => request_id,
        other => panic!("expected a tool request, got {:?}", other.is_some()),
    };
    state.router.complete(request_id, Ok(json!({ "late": true })));
    assert_eq!(state.router.pending_count(), 0);
}

#[tokio::test]
async fn registration_validates_token_and_id() {
    let state = single_tenant_state(Duration::from_secs(5));

    let (session_id, _rx) = state.sessions.open();
    let err = register_worker(
        &state,
        session_id,
        WORKER_TOKEN,
        "0000000000000000000000000000000000000000000000000000000000000000",
        WORKER_TOKEN,
        vec![echo_tool()],
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("worker_id"));

    let (session_id, _rx) = state.sessions.open();
    let err = register_worker(
        &state,
        session_id,
        WORKER_TOKEN,
        &worker_id_for_token(WORKER2_TOKEN),
        WORKER2_TOKEN,
        vec![echo_tool()],
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("bearer"));
}

#[tokio::test]
async fn invocation_is_confined_to_admitting_tenants() {
    let state = state_with(
        vec![
            tenant("T1", TENANT_TOKEN, &[WORKER_TOKEN]),
            tenant("T2", TENANT2_TOKEN, &[WORKER2_TOKEN]),
        ],
        Duration::from_secs(5),
    );
    let (_sid, rx) = connect_worker(&state, WORKER_TOKEN, vec![echo_tool()]).await;
    spawn_worker(&state, rx, |_| Ok(json!({ "ok": true })));

    let t1 = state.tenants.get_by_token(TENANT_TOKEN).unwrap();
    assert!(state.router.invoke(&t1, "echo", json!({})).await.is_ok());

    // T2 does not admit the worker; the same tool name resolves to nothing.
    let t2 = state.tenants.get_by_token(TENANT2_TOKEN).unwrap();
    let err = state.router.invoke(&t2, "echo", json!({})).await.unwrap_err();
    assert_eq!(err, InvokeError::ToolNotFound("echo".to_string()));
}
