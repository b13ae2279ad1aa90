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

//! Token hashing helpers.
//!
//! Worker identity and the public description URLs are both derived from
//! bearer tokens via SHA-256, so the raw tokens never have to leave the
//! process.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the input bytes.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable worker id for a worker token: the full 64-hex SHA-256 digest.
pub fn worker_id_for_token(worker_token: &str) -> String {
    sha256_hex(worker_token)
}

/// Public-safe URL segment for a tenant token: the first 16 hex characters
/// of its SHA-256 digest.
pub fn token_hash16(token: &str) -> String {
    let mut hash = sha256_hex(token);
    hash.truncate(16);
    hash
}
