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

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use anchorsync::bundle::TrustAnchorBundle;
use anchorsync::store::{Certificate, ObjectKey, Secret};
use anchorsync::{AnchorSource, Config, MemoryStore, Result, SecretSync, SyncSpec};
use std::sync::Arc;

pub const NS: &str = "trust-system";

/// PEM of a fresh self-signed root
pub fn root(name: &str) -> String {
    rcgen::generate_simple_self_signed(vec![name.to_string()])
        .unwrap()
        .cert
        .pem()
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NS, name)
}

/// Ready certificate `cert_name` plus the secret its issuer populated
pub fn issue(store: &MemoryStore, cert_name: &str, tls_crt: &str, tls_key: &str, ca: &str) {
    let secret_name = format!("{cert_name}-tls");
    store.put_certificate(Certificate::new(key(cert_name), &secret_name).ready(true));
    store.put_secret(
        Secret::new(key(&secret_name))
            .with("tls.crt", tls_crt)
            .with("tls.key", tls_key)
            .with("ca.crt", ca),
    );
}

/// Replace the CA of an issued certificate's secret
pub fn rotate_ca(store: &MemoryStore, cert_name: &str, ca: &str) {
    let secret_key = key(&format!("{cert_name}-tls"));
    let secret = store.secret(&secret_key).unwrap().with("ca.crt", ca);
    store.put_secret(secret);
}

/// Empty derived secret, created the way an installer would
pub fn derived(store: &MemoryStore, name: &str) {
    store.put_secret(Secret::new(key(name)));
}

pub fn engine(
    store: &Arc<MemoryStore>,
    specs: Vec<SyncSpec>,
    trust_anchor: Option<Arc<dyn AnchorSource>>,
) -> SecretSync {
    let config = Config::new(NS, specs).unwrap();
    SecretSync::new(store.clone(), &config, trust_anchor)
}

/// Anchors of a derived secret's CA field
pub fn anchors(store: &MemoryStore, secret: &str, field: &str) -> TrustAnchorBundle {
    let secret = store.secret(&key(secret)).unwrap();
    TrustAnchorBundle::parse(secret.field(field)).unwrap()
}

pub fn bundle_of(pems: &[&str]) -> TrustAnchorBundle {
    TrustAnchorBundle::parse(pems.concat().as_bytes()).unwrap()
}

/// Fixed anchors, in place of a file-backed source
pub struct StaticAnchors(pub TrustAnchorBundle);

impl AnchorSource for StaticAnchors {
    fn current_bundle(&self) -> Result<Arc<TrustAnchorBundle>> {
        Ok(Arc::new(self.0.clone()))
    }
}
