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

//! Toolbridge server: a multi-tenant bridge that exposes worker-hosted
//! tools as authenticated HTTP endpoints and publishes per-tenant OpenAPI
//! descriptions from live worker state.

pub mod api;
pub mod auth;
pub mod config;
pub mod logs;
pub mod openapi;
pub mod registry;
pub mod router;
pub mod session;

use anyhow::{Context, Result};
use api::AppState;
use auth::{AdminAuth, BearerAuth};
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use config::{generate_admin_token, BridgeConfig, LogFormat};
use logs::{LogHub, LogHubLayer};
use openapi::{DescriptionCache, DocSettings};
use registry::WorkerRegistry;
use router::{InvocationRouter, InvokeError};
use serde_json::json;
use session::{SessionConfig, SessionManager};
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolbridge_core::tenant::TenantRegistry;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long in-flight handlers get to write their error responses after a
/// shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn init_tracing(config: &BridgeConfig, hub: Arc<LogHub>) {
    let default_filter = format!(
        "toolbridge_server={level},toolbridge_core={level},tower_http=info",
        level = config.server.logging.level
    );
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_filter));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(LogHubLayer::new(hub));
    match config.server.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "non-string panic payload".to_string()
    };
    tracing::error!(%detail, "handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error", "code": "INTERNAL_ERROR" })),
    )
        .into_response()
}

/// Assemble the full route table over one shared state.
pub fn build_router(state: AppState) -> Router {
    let tenant_api = Router::new()
        .route("/api/tools/:name", post(api::tools::invoke_tool))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::tenant_auth,
        ));

    let admin_facet = Router::new()
        .route("/admin", get(api::admin::dashboard))
        .route("/api/admin/stats", get(api::admin::stats))
        .route("/logs/events", get(logs::log_events))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/ws", get(session::worker_session))
        .route("/openapi/:hash/json", get(api::openapi::description_json))
        .route("/openapi/:hash/yaml", get(api::openapi::description_yaml))
        .route(
            "/login",
            get(api::admin::login_page).post(api::admin::login_submit),
        )
        .route("/logout", get(api::admin::logout))
        .merge(tenant_api)
        .merge(admin_facet)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
}

/// Build the shared state from validated configuration.
pub fn build_state(config: &BridgeConfig, hub: Arc<LogHub>) -> Result<AppState> {
    let tenants = Arc::new(
        TenantRegistry::new(config.tenants()).context("invalid api space configuration")?,
    );

    let admin_token = match config.server.admin.admin_token.clone() {
        Some(token) => token,
        None => {
            let token = generate_admin_token();
            info!("no admin token configured; generated for this run: {token}");
            token
        }
    };

    let workers = Arc::new(WorkerRegistry::new());
    let sessions = Arc::new(SessionManager::new(SessionConfig {
        handshake_timeout: Duration::from_secs(config.server.session.handshake_timeout_secs),
        ..SessionConfig::default()
    }));
    let router = Arc::new(InvocationRouter::new(
        workers.clone(),
        sessions.clone(),
        Duration::from_secs(config.server.session.invoke_timeout_secs),
    ));
    let descriptions = Arc::new(DescriptionCache::new(DocSettings {
        base_title: "Toolbridge".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        server_url: config.public_url(),
    }));
    let auth = Arc::new(BearerAuth::new(tenants.clone(), admin_token.clone()));
    let admin = Arc::new(AdminAuth::new(admin_token));

    Ok(AppState {
        tenants,
        workers,
        sessions,
        router,
        descriptions,
        auth,
        admin,
        logs: hub,
        started_at: Instant::now(),
    })
}

pub async fn run_server(config: BridgeConfig) -> Result<()> {
    config.validate().context("configuration rejected")?;

    let hub = LogHub::new(200);
    init_tracing(&config, hub.clone());

    info!(version = env!("CARGO_PKG_VERSION"), "starting toolbridge server");
    info!(
        api_spaces = config.server.api_spaces.len(),
        public_url = %config.public_url(),
        "configuration loaded"
    );

    let state = build_state(&config, hub)?;
    let app = build_router(state.clone());

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tokio::select! {
        joined = &mut server => {
            // The listener died on its own; nothing left to drain.
            joined.context("server task panicked")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
        }
    }

    info!("shutdown signal received; draining sessions");
    state.sessions.close_all("server shutting down").await;
    state.router.fail_all(InvokeError::ServerShutdown);
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(joined) => joined.context("server task panicked")??,
        Err(_) => {
            warn!("grace window elapsed; closing the listener");
            server.abort();
        }
    }

    info!("toolbridge server stopped");
    Ok(())
}
