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

//! In-memory store backend
//!
//! Resource versions increase on every write so that concurrent updates of
//! the same secret behave like the API server: the loser gets `Conflict`.

use super::{Certificate, ObjectKey, ResourceStore, Secret, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// In-memory resource store
#[derive(Debug, Default)]
pub struct MemoryStore {
    certificates: RwLock<HashMap<ObjectKey, Certificate>>,
    secrets: RwLock<HashMap<ObjectKey, Secret>>,
    failing: RwLock<HashSet<ObjectKey>>,
    version: AtomicU64,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a certificate
    pub fn put_certificate(&self, cert: Certificate) {
        self.certificates
            .write()
            .unwrap()
            .insert(cert.key.clone(), cert);
    }

    pub fn remove_certificate(&self, key: &ObjectKey) {
        self.certificates.write().unwrap().remove(key);
    }

    /// Insert or replace a secret, bypassing version checks
    pub fn put_secret(&self, mut secret: Secret) -> Secret {
        secret.resource_version = self.next_version();
        self.secrets
            .write()
            .unwrap()
            .insert(secret.key.clone(), secret.clone());
        secret
    }

    pub fn remove_secret(&self, key: &ObjectKey) {
        self.secrets.write().unwrap().remove(key);
    }

    /// Current stored copy of a secret
    pub fn secret(&self, key: &ObjectKey) -> Option<Secret> {
        self.secrets.read().unwrap().get(key).cloned()
    }

    /// Number of successful `update_secret` calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every read and write of `key` fail with a transport error
    pub fn fail(&self, key: ObjectKey) {
        self.failing.write().unwrap().insert(key);
    }

    pub fn heal(&self, key: &ObjectKey) {
        self.failing.write().unwrap().remove(key);
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check(&self, key: &ObjectKey) -> Result<(), StoreError> {
        if self.failing.read().unwrap().contains(key) {
            return Err(StoreError::Transport(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_certificate(&self, key: &ObjectKey) -> Result<Certificate, StoreError> {
        self.check(key)?;
        self.certificates
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret, StoreError> {
        self.check(key)?;
        self.secrets
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.check(&secret.key)?;
        let mut secrets = self.secrets.write().unwrap();
        let stored = secrets
            .get_mut(&secret.key)
            .ok_or_else(|| StoreError::NotFound(secret.key.clone()))?;

        if stored.resource_version != secret.resource_version {
            return Err(StoreError::Conflict(secret.key.clone()));
        }

        let mut updated = secret.clone();
        updated.resource_version = self.next_version();
        *stored = updated.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);

        debug!(secret = %secret.key, version = updated.resource_version, "Secret updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let key = ObjectKey::new("ns", "missing");
        assert!(store.get_secret(&key).await.unwrap_err().is_not_found());
        assert!(store.get_certificate(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_never_creates() {
        let store = MemoryStore::new();
        let secret = Secret::new(ObjectKey::new("ns", "s"));
        assert!(store.update_secret(&secret).await.unwrap_err().is_not_found());
        assert!(store.secret(&secret.key).is_none());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_update_conflict_on_stale_version() {
        let store = MemoryStore::new();
        let key = ObjectKey::new("ns", "s");
        store.put_secret(Secret::new(key.clone()));

        let first = store.get_secret(&key).await.unwrap();
        let second = store.get_secret(&key).await.unwrap();

        let updated = store.update_secret(&first.with("a", "1")).await.unwrap();
        assert!(updated.resource_version > second.resource_version);

        let err = store.update_secret(&second.with("a", "2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.secret(&key).unwrap().field("a"), b"1");
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        let key = ObjectKey::new("ns", "s");
        store.put_secret(Secret::new(key.clone()));
        store.fail(key.clone());

        assert!(matches!(
            store.get_secret(&key).await,
            Err(StoreError::Transport(_))
        ));

        store.heal(&key);
        assert!(store.get_secret(&key).await.is_ok());
    }
}
