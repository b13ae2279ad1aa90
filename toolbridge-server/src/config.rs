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

//! Toolbridge Server Configuration
//!
//! Layered TOML file > `TOOLBRIDGE_*` environment > defaults. Validation
//! errors are fatal at startup: the bridge never runs with a half-usable
//! tenant table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toolbridge_core::tenant::Tenant;

/// Minimum length for every bearer token the bridge accepts or issues.
pub const MIN_TOKEN_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("mode {0:?} belongs to the worker binary; this server only runs mode = \"server\"")]
    UnsupportedMode(Mode),

    #[error("server.http.port must be between 1 and 65535")]
    InvalidPort,

    #[error("invalid listen address {0}: {1}")]
    InvalidListenAddr(String, String),

    #[error("at least one [[server.api_spaces]] entry must be configured")]
    NoApiSpaces,

    #[error("api space name must not be empty")]
    EmptySpaceName,

    #[error("api space {0}: bearer_token must be at least {MIN_TOKEN_LEN} characters")]
    BearerTokenTooShort(String),

    #[error("api space {0}: allowed_client_tokens must have at least one entry")]
    NoWorkerTokens(String),

    #[error("api space {0}: every allowed_client_tokens entry must be at least {MIN_TOKEN_LEN} characters")]
    WorkerTokenTooShort(String),

    #[error("server.admin.admin_token must be at least {MIN_TOKEN_LEN} characters")]
    AdminTokenTooShort,

    #[error("the admin token must differ from every api space bearer token (collides with {0})")]
    AdminTokenCollision(String),

    #[error(transparent)]
    Tenants(#[from] toolbridge_core::tenant::TenantRegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Server,
    Client,
    Combo,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Server
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub api_spaces: Vec<ApiSpaceConfig>,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionTimeouts,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL advertised in generated descriptions. Falls back to the
    /// listen address when unset.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

/// One isolated API namespace over the shared worker pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiSpaceConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Tenant bearer token presented by HTTP callers.
    pub bearer_token: String,
    /// Worker tokens admitted into this space.
    #[serde(default)]
    pub allowed_client_tokens: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Absent: a random token is generated at startup and logged once.
    #[serde(default)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionTimeouts {
    /// Window between upgrade and the mandatory `register` frame.
    #[serde(default = "default_handshake_secs")]
    pub handshake_timeout_secs: u64,
    /// Hard deadline for one tool invocation.
    #[serde(default = "default_invoke_secs")]
    pub invoke_timeout_secs: u64,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_secs(),
            invoke_timeout_secs: default_invoke_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_handshake_secs() -> u64 {
    10
}

fn default_invoke_secs() -> u64 {
    30
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Load configuration with priority: file > env > defaults.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.merge_env();
        Ok(config)
    }

    /// Apply `TOOLBRIDGE_*` environment overrides.
    ///
    /// Supported variables:
    /// - TOOLBRIDGE_HTTP_ADDR: listen address, `host:port`
    /// - TOOLBRIDGE_PUBLIC_URL: advertised base URL
    /// - TOOLBRIDGE_ADMIN_TOKEN: admin token
    /// - TOOLBRIDGE_LOG_LEVEL: debug|info|warn|error
    /// - TOOLBRIDGE_LOG_FORMAT: text|json
    fn merge_env(&mut self) {
        if let Ok(addr) = std::env::var("TOOLBRIDGE_HTTP_ADDR") {
            // Invalid values surface later through validate().
            let _ = self.apply_http_addr(&addr);
        }
        if let Ok(url) = std::env::var("TOOLBRIDGE_PUBLIC_URL") {
            self.server.http.public_url = Some(url);
        }
        if let Ok(token) = std::env::var("TOOLBRIDGE_ADMIN_TOKEN") {
            self.server.admin.admin_token = Some(token);
        }
        if let Ok(level) = std::env::var("TOOLBRIDGE_LOG_LEVEL") {
            if let Ok(level) = toml::Value::String(level).try_into() {
                self.server.logging.level = level;
            }
        }
        if let Ok(format) = std::env::var("TOOLBRIDGE_LOG_FORMAT") {
            if let Ok(format) = toml::Value::String(format).try_into() {
                self.server.logging.format = format;
            }
        }
    }

    /// Parse a `host:port` override.
    pub fn apply_http_addr(&mut self, addr: &str) -> Result<(), ConfigError> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| {
                ConfigError::InvalidListenAddr(addr.to_string(), "expected host:port".to_string())
            })?;
        let port: u16 = port.parse().map_err(|e| {
            ConfigError::InvalidListenAddr(addr.to_string(), format!("bad port: {e}"))
        })?;
        self.server.http.host = host.to_string();
        self.server.http.port = port;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.http.host, self.server.http.port);
        addr.parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidListenAddr(addr, e.to_string()))
    }

    /// Base URL for generated descriptions.
    pub fn public_url(&self) -> String {
        self.server
            .http
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.http.host, self.server.http.port))
    }

    /// Tenants in configuration order, for the tenant registry.
    pub fn tenants(&self) -> Vec<Tenant> {
        self.server
            .api_spaces
            .iter()
            .map(|space| Tenant {
                name: space.name.clone(),
                description: space.description.clone(),
                bearer_token: space.bearer_token.clone(),
                allowed_worker_tokens: space.allowed_client_tokens.clone(),
            })
            .collect()
    }

    /// Structural checks that do not need the tenant registry. Cross-space
    /// token and hash collisions are caught by `TenantRegistry::new`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode != Mode::Server {
            return Err(ConfigError::UnsupportedMode(self.mode));
        }
        if self.server.http.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        self.socket_addr()?;

        if self.server.api_spaces.is_empty() {
            return Err(ConfigError::NoApiSpaces);
        }
        for space in &self.server.api_spaces {
            if space.name.trim().is_empty() {
                return Err(ConfigError::EmptySpaceName);
            }
            if space.bearer_token.len() < MIN_TOKEN_LEN {
                return Err(ConfigError::BearerTokenTooShort(space.name.clone()));
            }
            if space.allowed_client_tokens.is_empty() {
                return Err(ConfigError::NoWorkerTokens(space.name.clone()));
            }
            if space
                .allowed_client_tokens
                .iter()
                .any(|t| t.len() < MIN_TOKEN_LEN)
            {
                return Err(ConfigError::WorkerTokenTooShort(space.name.clone()));
            }
        }

        if let Some(admin_token) = &self.server.admin.admin_token {
            if admin_token.len() < MIN_TOKEN_LEN {
                return Err(ConfigError::AdminTokenTooShort);
            }
            if let Some(space) = self
                .server
                .api_spaces
                .iter()
                .find(|s| &s.bearer_token == admin_token)
            {
                return Err(ConfigError::AdminTokenCollision(space.name.clone()));
            }
        }

        Ok(())
    }
}

/// Random alphanumeric admin token for runs without a configured one.
pub fn generate_admin_token() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}
