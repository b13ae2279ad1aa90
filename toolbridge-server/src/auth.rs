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

//! Bearer and admin-cookie authentication.
//!
//! A bearer classifies as a tenant, the admin, or nothing. Tenant lookups
//! ride the startup-built token index; admin comparisons are constant-time.
//! The resolved tenant is attached to the request for downstream handlers.

use crate::api::{ApiError, AppState};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use toolbridge_core::tenant::{Tenant, TenantRegistry};
use toolbridge_core::token_hash16;

/// Equality without early exit; also used for worker-token checks at
/// register time.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Extract the bearer from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(ApiError::MissingAuthHeader)?;
    let value = value.to_str().map_err(|_| ApiError::InvalidAuthHeader)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(ApiError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(ApiError::InvalidAuthHeader);
    }
    Ok(token)
}

/// Who a bearer turned out to be.
#[derive(Debug, Clone)]
pub enum Principal {
    Tenant(Arc<Tenant>),
    Admin,
}

/// Classifies bearers against the tenant registry and the admin token.
pub struct BearerAuth {
    tenants: Arc<TenantRegistry>,
    admin_token: String,
}

impl BearerAuth {
    pub fn new(tenants: Arc<TenantRegistry>, admin_token: String) -> Self {
        Self {
            tenants,
            admin_token,
        }
    }

    pub fn classify(&self, headers: &HeaderMap) -> Result<Principal, ApiError> {
        let token = bearer_token(headers)?;
        if let Some(tenant) = self.tenants.get_by_token(token) {
            return Ok(Principal::Tenant(tenant));
        }
        if constant_time_eq(token, &self.admin_token) {
            return Ok(Principal::Admin);
        }
        Err(ApiError::UnknownToken)
    }

    /// Resolve the public-safe 16-hex prefix used in description URLs.
    pub fn tenant_from_hash(&self, hash: &str) -> Option<Arc<Tenant>> {
        self.tenants.get_by_hash(hash)
    }
}

/// Middleware for tenant-scoped API routes. Binds the tenant into request
/// extensions; the admin token does not open tool invocation.
pub async fn tenant_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match state.auth.classify(req.headers())? {
        Principal::Tenant(tenant) => {
            req.extensions_mut().insert(tenant);
            Ok(next.run(req).await)
        }
        Principal::Admin => Err(ApiError::Forbidden),
    }
}

/// Admin cookie issuing and verification.
///
/// The cookie value is the first 16 hex chars of SHA-256(admin token), so
/// `require_admin` can re-derive it instead of keeping session state.
pub struct AdminAuth {
    token: String,
    cookie_value: String,
}

impl AdminAuth {
    pub const COOKIE_NAME: &'static str = "adminSession";

    pub fn new(admin_token: String) -> Self {
        let cookie_value = token_hash16(&admin_token);
        Self {
            token: admin_token,
            cookie_value,
        }
    }

    pub fn verify_token(&self, presented: &str) -> bool {
        constant_time_eq(presented, &self.token)
    }

    pub fn verify_cookie_header(&self, headers: &HeaderMap) -> bool {
        match cookie_value(headers, Self::COOKIE_NAME) {
            Some(value) => constant_time_eq(&value, &self.cookie_value),
            None => false,
        }
    }

    /// `Set-Cookie` value establishing an admin session for 24 h.
    pub fn session_cookie(&self) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age=86400",
            Self::COOKIE_NAME,
            self.cookie_value
        )
    }

    /// `Set-Cookie` value clearing the session.
    pub fn clear_cookie() -> String {
        format!(
            "{}=; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age=0",
            Self::COOKIE_NAME
        )
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Middleware for the admin facet. Browsers hitting `/admin` bounce to the
/// login form; API and stream endpoints get a 401.
pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if state.admin.verify_cookie_header(req.headers()) {
        return next.run(req).await;
    }
    if req.uri().path().starts_with("/admin") {
        return (
            StatusCode::FOUND,
            [(header::LOCATION, "/login".to_string())],
        )
            .into_response();
    }
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "admin session required", "code": "MISSING_ADMIN_SESSION" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<TenantRegistry> {
        Arc::new(
            TenantRegistry::new(vec![Tenant {
                name: "t1".to_string(),
                description: None,
                bearer_token: "t-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
                allowed_worker_tokens: vec!["w-bbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string()],
            }])
            .unwrap(),
        )
    }

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth.parse().unwrap());
        headers
    }

    #[test]
    fn classifies_tenant_admin_and_unknown() {
        let auth = BearerAuth::new(registry(), "adm-cccccccccccccccccccccccccccccc".to_string());

        let tenant = auth
            .classify(&headers_with("Bearer t-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"))
            .unwrap();
        assert!(matches!(tenant, Principal::Tenant(t) if t.name == "t1"));

        let admin = auth
            .classify(&headers_with("Bearer adm-cccccccccccccccccccccccccccccc"))
            .unwrap();
        assert!(matches!(admin, Principal::Admin));

        let err = auth.classify(&headers_with("Bearer nope")).unwrap_err();
        assert!(matches!(err, ApiError::UnknownToken));
    }

    #[test]
    fn missing_and_malformed_headers_are_distinct() {
        assert!(matches!(
            bearer_token(&HeaderMap::new()).unwrap_err(),
            ApiError::MissingAuthHeader
        ));
        assert!(matches!(
            bearer_token(&headers_with("Basic dXNlcg==")).unwrap_err(),
            ApiError::InvalidAuthHeader
        ));
        assert!(matches!(
            bearer_token(&headers_with("Bearer ")).unwrap_err(),
            ApiError::InvalidAuthHeader
        ));
    }

    #[test]
    fn admin_cookie_round_trip() {
        let admin = AdminAuth::new("adm-cccccccccccccccccccccccccccccc".to_string());
        assert!(admin.verify_token("adm-cccccccccccccccccccccccccccccc"));
        assert!(!admin.verify_token("adm-wrong"));

        let cookie = admin.session_cookie();
        assert!(cookie.starts_with("adminSession="));
        for attr in ["HttpOnly", "Secure", "SameSite=Strict", "Max-Age=86400"] {
            assert!(cookie.contains(attr), "missing {attr}");
        }

        let mut headers = HeaderMap::new();
        let pair = cookie.split(';').next().unwrap().to_string();
        headers.insert(header::COOKIE, format!("other=1; {pair}").parse().unwrap());
        assert!(admin.verify_cookie_header(&headers));

        let mut bad = HeaderMap::new();
        bad.insert(header::COOKIE, "adminSession=ffff".parse().unwrap());
        assert!(!admin.verify_cookie_header(&bad));
    }

    #[test]
    fn cookie_value_is_the_token_hash_prefix() {
        let token = "adm-cccccccccccccccccccccccccccccc";
        let admin = AdminAuth::new(token.to_string());
        let cookie = admin.session_cookie();
        let value = cookie
            .split(';')
            .next()
            .unwrap()
            .split_once('=')
            .unwrap()
            .1
            .to_string();
        assert_eq!(value, token_hash16(token));
        assert_eq!(value.len(), 16);
    }
}
