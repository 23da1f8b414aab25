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

//! Resource store abstraction.
//!
//! The engine reads certificates and secrets through a read-through cache
//! and persists secrets through a write client. Both sit behind
//! [`ResourceStore`]; the watch/cache layer that backs it lives outside
//! this crate. [`MemoryStore`] is the in-process backend.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Data key holding the issuer certificate in a source secret
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Data key holding the issuer private key in a source secret
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// Data key holding the CA bundle in a source secret
pub const TLS_CA_KEY: &str = "ca.crt";

/// Condition type signalling a certificate holds valid key material
pub const CONDITION_READY: &str = "Ready";

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectKey),

    #[error("conflict updating {0}: the object has been modified")]
    Conflict(ObjectKey),

    #[error("transport error: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Namespaced object identity
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Secret object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Secret {
    pub key: ObjectKey,
    /// Opaque version used for optimistic concurrency on update
    pub resource_version: u64,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            resource_version: 0,
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }

    /// Value of `field`, empty when absent
    pub fn field(&self, field: &str) -> &[u8] {
        self.data.get(field).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Status condition on a certificate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

/// Externally managed certificate resource. Read-only to this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub key: ObjectKey,
    /// Name of the secret the issuer populates, in the certificate's namespace
    pub secret_name: String,
    pub conditions: Vec<Condition>,
}

impl Certificate {
    pub fn new(key: ObjectKey, secret_name: impl Into<String>) -> Self {
        Self {
            key,
            secret_name: secret_name.into(),
            conditions: Vec::new(),
        }
    }

    /// Set the Ready condition
    pub fn ready(mut self, ready: bool) -> Self {
        self.conditions.retain(|c| c.kind != CONDITION_READY);
        self.conditions.push(Condition {
            kind: CONDITION_READY.to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
        });
        self
    }

    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == CONDITION_READY && c.status == "True")
    }

    /// Identity of the secret holding this certificate's key material
    pub fn secret_key(&self) -> ObjectKey {
        ObjectKey::new(&self.key.namespace, &self.secret_name)
    }
}

/// Read-through cache plus write client.
///
/// Every call may block on network I/O; callers cancel by dropping the
/// future.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_certificate(&self, key: &ObjectKey) -> Result<Certificate, StoreError>;

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret, StoreError>;

    /// Persist `secret`. Fails with `Conflict` if it was modified since it
    /// was read, and with `NotFound` if it no longer exists.
    async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_ready() {
        let cert = Certificate::new(ObjectKey::new("ns", "c"), "s");
        assert!(!cert.is_ready());
        assert!(cert.clone().ready(true).is_ready());
        assert!(!cert.ready(true).ready(false).is_ready());
    }

    #[test]
    fn test_secret_field_absent_is_empty() {
        let secret = Secret::new(ObjectKey::new("ns", "s")).with("a", "b");
        assert_eq!(secret.field("a"), b"b");
        assert!(secret.field("missing").is_empty());
    }

    #[test]
    fn test_new_secret_is_unversioned_and_empty() {
        let key = ObjectKey::new("ns", "s");
        let secret = Secret::new(key.clone());
        assert_eq!(secret.key, key);
        assert_eq!(secret.resource_version, 0);
        assert!(secret.data.is_empty());
    }

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::new("ns", "name").to_string(), "ns/name");
    }
}
