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

//! Admin facet: token-gated session cookie, dashboard, counters.
//!
//! Pages are rendered inline; the only state is the cookie value derived
//! from the admin token. Worker and tenant tokens never reach a response.

use super::AppState;
use crate::auth::AdminAuth;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(rename = "adminToken")]
    pub admin_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminStats {
    pub tenants: usize,
    pub workers_known: usize,
    pub workers_connected: usize,
    pub tools: usize,
    pub active_sessions: usize,
    pub pending_invocations: usize,
    pub uptime_seconds: u64,
}

fn found(location: &str, cookie: Option<String>) -> Response {
    match cookie {
        Some(cookie) => (
            StatusCode::FOUND,
            [
                (header::LOCATION, location.to_string()),
                (header::SET_COOKIE, cookie),
            ],
        )
            .into_response(),
        None => (
            StatusCode::FOUND,
            [(header::LOCATION, location.to_string())],
        )
            .into_response(),
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// GET /login
pub async fn login_page(Query(query): Query<LoginQuery>) -> Html<String> {
    let banner = if query.error.is_some() {
        r#"<p class="banner">Invalid admin token.</p>"#
    } else {
        ""
    };
    Html(format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Toolbridge admin login</title>
<style>
body {{ font-family: sans-serif; max-width: 26rem; margin: 4rem auto; }}
.banner {{ background: #fdd; border: 1px solid #c66; padding: 0.5rem; }}
input {{ width: 100%; padding: 0.4rem; margin: 0.4rem 0; }}
</style></head>
<body>
<h1>Toolbridge admin</h1>
{banner}
<form method="post" action="/login">
  <label for="adminToken">Admin token</label>
  <input type="password" id="adminToken" name="adminToken" autofocus>
  <input type="submit" value="Sign in">
</form>
</body>
</html>"#
    ))
}

/// POST /login: constant-time token check, then a 24 h session cookie.
pub async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Response {
    if state.admin.verify_token(&form.admin_token) {
        info!("admin login succeeded");
        found("/admin", Some(state.admin.session_cookie()))
    } else {
        warn!("admin login rejected");
        found("/login?error=1", None)
    }
}

/// GET /logout
pub async fn logout() -> Response {
    found("/login", Some(AdminAuth::clear_cookie()))
}

/// GET /api/admin/stats
pub async fn stats(State(state): State<AppState>) -> Json<AdminStats> {
    let snapshot = state.workers.snapshot();
    let tools: HashSet<&str> = snapshot
        .iter()
        .filter(|w| w.is_connected())
        .flat_map(|w| w.tools.iter().map(|t| t.name.as_str()))
        .collect();

    Json(AdminStats {
        tenants: state.tenants.len(),
        workers_known: snapshot.len(),
        workers_connected: snapshot.iter().filter(|w| w.is_connected()).count(),
        tools: tools.len(),
        active_sessions: state.sessions.active_count(),
        pending_invocations: state.router.pending_count(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// GET /admin: dashboard with totals and one card per api space.
pub async fn dashboard(State(state): State<AppState>) -> Html<String> {
    let snapshot = state.workers.snapshot();
    let connected = snapshot.iter().filter(|w| w.is_connected()).count();
    let tools: HashSet<&str> = snapshot
        .iter()
        .filter(|w| w.is_connected())
        .flat_map(|w| w.tools.iter().map(|t| t.name.as_str()))
        .collect();
    let uptime = state.started_at.elapsed().as_secs();

    let mut cards = String::new();
    for tenant in state.tenants.list() {
        let hash = tenant.token_hash();
        let mut rows = String::new();
        for worker in snapshot
            .iter()
            .filter(|w| tenant.admits(&w.worker_token))
        {
            let status = if worker.is_connected() {
                "connected"
            } else {
                "disconnected"
            };
            rows.push_str(&format!(
                "<tr><td><code>{}</code></td><td class=\"{status}\">{status}</td><td>{}</td></tr>",
                escape_html(worker.id_prefix()),
                worker.tools.len(),
            ));
        }
        if rows.is_empty() {
            rows.push_str(r#"<tr><td colspan="3">no workers seen yet</td></tr>"#);
        }
        cards.push_str(&format!(
            r#"<section class="card">
<h2>{name}</h2>
<p>{description}</p>
<table><tr><th>worker</th><th>state</th><th>tools</th></tr>{rows}</table>
<p>Description:
  <a href="/openapi/{hash}/json">JSON</a> ·
  <a href="/openapi/{hash}/yaml">YAML</a></p>
</section>"#,
            name = escape_html(&tenant.name),
            description = escape_html(tenant.description.as_deref().unwrap_or("")),
        ));
    }

    Html(format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Toolbridge admin</title>
<style>
body {{ font-family: sans-serif; max-width: 56rem; margin: 2rem auto; }}
.card {{ border: 1px solid #ccc; border-radius: 6px; padding: 1rem; margin: 1rem 0; }}
.totals span {{ margin-right: 1.5rem; }}
table {{ border-collapse: collapse; }}
td, th {{ border: 1px solid #ddd; padding: 0.25rem 0.5rem; text-align: left; }}
.connected {{ color: #2a7a2a; }}
.disconnected {{ color: #a33; }}
</style></head>
<body>
<h1>Toolbridge</h1>
<p class="totals">
  <span>api spaces: <strong>{tenants}</strong></span>
  <span>connected workers: <strong>{connected}</strong></span>
  <span>tools: <strong>{tool_count}</strong></span>
  <span>uptime: <strong>{uptime}s</strong></span>
  <span><a href="/logout">log out</a></span>
</p>
{cards}
</body>
</html>"#,
        tenants = state.tenants.len(),
        tool_count = tools.len(),
    ))
}
