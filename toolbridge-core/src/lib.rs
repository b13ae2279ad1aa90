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

//! Domain types for the toolbridge dispatcher.
//!
//! This crate holds everything the server shares with tests and (eventually)
//! worker-side tooling: the tenant model, tool schemas, worker records, the
//! session wire protocol, and token hashing. It performs no IO; the running
//! dispatcher lives in `toolbridge-server`.

pub mod protocol;
pub mod tenant;
pub mod token;
pub mod tool;
pub mod worker;

pub use protocol::SessionMessage;
pub use tenant::{Tenant, TenantRegistry, TenantRegistryError};
pub use token::{sha256_hex, token_hash16, worker_id_for_token};
pub use tool::ToolSchema;
pub use worker::{ConnectionState, WorkerRecord};
