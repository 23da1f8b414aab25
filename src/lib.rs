/*
 * Copyright Nitro Agility S.r.l.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! anchorsync - append-only trust anchor synchronization.
//!
//! Copies an issuer's certificate and key from the secret an external
//! issuer maintains into derived secrets, and grows each derived trust
//! anchor bundle without ever removing an anchor.

// Bundle types re-export
pub mod bundle {
    pub use anchorsync_bundle::*;
}

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod telemetry;

// Resources
pub mod store;

// Trust anchors
pub mod trustanchor;

// Reconciliation
pub mod controller;
pub mod manager;

// Public API
pub use cli::Cli;
pub use config::{Config, FieldKeys, SyncSpec};
pub use controller::{Event, Outcome, Request, SecretSync, Triggers};
pub use error::{Error, Result};
pub use manager::Manager;
pub use store::{MemoryStore, ResourceStore};
pub use trustanchor::{AnchorSource, TrustAnchorSource};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
