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

//! Tenant model and registry.
//!
//! Tenants are isolated API namespaces sharing one pool of workers. The
//! registry is built once from validated configuration and is read-only for
//! the rest of the process lifetime, so lookups take no locks.
//!
//! Error messages here never contain token material; tenants are referred
//! to by name.

use crate::token::token_hash16;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// An isolated API namespace: its own bearer token plus the set of worker
/// tokens admitted into it. Immutable after startup.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub name: String,
    pub description: Option<String>,
    pub bearer_token: String,
    pub allowed_worker_tokens: Vec<String>,
}

impl Tenant {
    /// Whether a worker holding `worker_token` may serve calls in this
    /// tenant.
    pub fn admits(&self, worker_token: &str) -> bool {
        self.allowed_worker_tokens.iter().any(|t| t == worker_token)
    }

    /// First 16 hex chars of SHA-256 of the bearer token; safe to put in
    /// public description URLs.
    pub fn token_hash(&self) -> String {
        token_hash16(&self.bearer_token)
    }
}

#[derive(Debug, Error)]
pub enum TenantRegistryError {
    #[error("at least one api space must be configured")]
    NoTenants,

    #[error("duplicate api space name: {0}")]
    DuplicateName(String),

    #[error("api space {0} reuses a bearer token already assigned to {1}")]
    TokenCollision(String, String),

    #[error("api spaces {0} and {1} collide on their 16-hex token hash")]
    HashCollision(String, String),
}

/// Read-only index over the configured tenants.
///
/// `list()` preserves configuration order, which is the stable order every
/// dashboard and description consumer sees.
#[derive(Debug)]
pub struct TenantRegistry {
    tenants: Vec<Arc<Tenant>>,
    by_token: HashMap<String, Arc<Tenant>>,
    by_hash: HashMap<String, Arc<Tenant>>,
    by_worker_token: HashMap<String, Vec<Arc<Tenant>>>,
}

impl TenantRegistry {
    pub fn new(tenants: Vec<Tenant>) -> Result<Self, TenantRegistryError> {
        if tenants.is_empty() {
            return Err(TenantRegistryError::NoTenants);
        }

        let tenants: Vec<Arc<Tenant>> = tenants.into_iter().map(Arc::new).collect();
        let mut by_token = HashMap::new();
        let mut by_hash = HashMap::new();
        let mut by_worker_token: HashMap<String, Vec<Arc<Tenant>>> = HashMap::new();
        let mut names = HashMap::new();

        for tenant in &tenants {
            if let Some(prev) = names.insert(tenant.name.clone(), tenant.clone()) {
                return Err(TenantRegistryError::DuplicateName(prev.name.clone()));
            }
            if let Some(prev) = by_token.insert(tenant.bearer_token.clone(), tenant.clone()) {
                return Err(TenantRegistryError::TokenCollision(
                    tenant.name.clone(),
                    prev.name.clone(),
                ));
            }
            if let Some(prev) = by_hash.insert(tenant.token_hash(), tenant.clone()) {
                return Err(TenantRegistryError::HashCollision(
                    tenant.name.clone(),
                    prev.name.clone(),
                ));
            }
            for worker_token in &tenant.allowed_worker_tokens {
                by_worker_token
                    .entry(worker_token.clone())
                    .or_default()
                    .push(tenant.clone());
            }
        }

        Ok(Self {
            tenants,
            by_token,
            by_hash,
            by_worker_token,
        })
    }

    pub fn get_by_token(&self, bearer_token: &str) -> Option<Arc<Tenant>> {
        self.by_token.get(bearer_token).cloned()
    }

    /// Resolves the public-safe 16-hex prefix used in description URLs.
    pub fn get_by_hash(&self, hash: &str) -> Option<Arc<Tenant>> {
        self.by_hash.get(hash).cloned()
    }

    /// Every tenant that admits the given worker token. Empty for unknown
    /// tokens; such a worker can connect but never be dispatched.
    pub fn tenants_admitting(&self, worker_token: &str) -> &[Arc<Tenant>] {
        self.by_worker_token
            .get(worker_token)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn admits(&self, tenant: &Tenant, worker_token: &str) -> bool {
        tenant.admits(worker_token)
    }

    /// Configuration-ordered tenants.
    pub fn list(&self) -> &[Arc<Tenant>] {
        &self.tenants
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
