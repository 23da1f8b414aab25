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

//! Maps change notifications to reconcile requests.

use super::Request;
use crate::config::{Config, SyncSpec};
use crate::store::{ObjectKey, ResourceStore};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A change observed by the watch layer, or by the trust anchor source
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A secret changed
    Secret(ObjectKey),
    /// A certificate changed
    Certificate(ObjectKey),
    /// The trust anchor file was reloaded
    TrustAnchor,
}

/// Filters and translates events for the configured sync specs
pub struct Triggers {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    specs: Vec<SyncSpec>,
}

impl Triggers {
    pub fn new(store: Arc<dyn ResourceStore>, config: &Config) -> Self {
        Self {
            store,
            namespace: config.namespace.clone(),
            specs: config.sync_specs.clone(),
        }
    }

    /// Requests for `event`. Events for unrelated objects map to nothing.
    pub async fn requests(&self, event: &Event) -> Vec<Request> {
        match event {
            Event::Secret(key) => self.secret_changed(key).into_iter().collect(),
            Event::Certificate(key) => self.certificate_changed(key).await.into_iter().collect(),
            Event::TrustAnchor => self.trust_anchor_changed(),
        }
    }

    /// A derived secret changed: reconcile it directly.
    pub fn secret_changed(&self, key: &ObjectKey) -> Option<Request> {
        if key.namespace != self.namespace || !self.specs.iter().any(|s| s.targets(&key.name)) {
            return None;
        }
        Some(Request::new(key.clone()))
    }

    /// A source certificate changed: reconcile its secret once it is ready.
    pub async fn certificate_changed(&self, key: &ObjectKey) -> Option<Request> {
        if key.namespace != self.namespace
            || !self.specs.iter().any(|s| s.certificate_name == key.name)
        {
            return None;
        }

        let cert = match self.store.get_certificate(key).await {
            Ok(cert) => cert,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                // Most likely a network error; the cache will send another
                // event once it catches up.
                error!(error = %e, certificate = %key, "Failed to get certificate");
                return None;
            }
        };

        if !cert.is_ready() {
            warn!(certificate = %key, "Certificate is not ready yet");
            return None;
        }

        debug!(certificate = %key, secret = %cert.secret_name, "Certificate changed");
        Some(Request::new(cert.secret_key()))
    }

    /// The anchors changed independently of any certificate: reconcile
    /// every secret that carries a CA bundle.
    pub fn trust_anchor_changed(&self) -> Vec<Request> {
        let mut requests: Vec<Request> = Vec::new();
        for name in self.specs.iter().filter_map(|s| s.ca_secret_name.as_deref()) {
            let request = Request::new(ObjectKey::new(&self.namespace, name));
            if !requests.contains(&request) {
                requests.push(request);
            }
        }
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Certificate, MemoryStore};

    const NS: &str = "trust-system";

    fn setup() -> (Arc<MemoryStore>, Triggers) {
        let mut separate = SyncSpec::combined("issuer-b", "b-certs");
        separate.ca_secret_name = Some("b-ca".into());
        let mut no_ca = SyncSpec::combined("issuer-c", "c-certs");
        no_ca.ca_secret_name = None;

        let config = Config::new(
            NS,
            vec![SyncSpec::combined("issuer-a", "trust-bundle"), separate, no_ca],
        )
        .unwrap();

        let store = Arc::new(MemoryStore::new());
        let triggers = Triggers::new(store.clone(), &config);
        (store, triggers)
    }

    #[test]
    fn test_secret_filter() {
        let (_, triggers) = setup();

        let hit = triggers.secret_changed(&ObjectKey::new(NS, "trust-bundle"));
        assert_eq!(hit, Some(Request::new(ObjectKey::new(NS, "trust-bundle"))));
        assert!(triggers.secret_changed(&ObjectKey::new(NS, "b-ca")).is_some());

        assert!(triggers.secret_changed(&ObjectKey::new("other", "trust-bundle")).is_none());
        assert!(triggers.secret_changed(&ObjectKey::new(NS, "unrelated")).is_none());
    }

    #[tokio::test]
    async fn test_certificate_missing_is_dropped() {
        let (_, triggers) = setup();
        assert!(triggers
            .certificate_changed(&ObjectKey::new(NS, "issuer-a"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_certificate_not_ready_is_dropped() {
        let (store, triggers) = setup();
        let key = ObjectKey::new(NS, "issuer-a");
        store.put_certificate(Certificate::new(key.clone(), "issuer-a-tls").ready(false));

        assert!(triggers.certificate_changed(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_certificate_ready_maps_to_its_secret() {
        let (store, triggers) = setup();
        let key = ObjectKey::new(NS, "issuer-a");
        store.put_certificate(Certificate::new(key.clone(), "issuer-a-tls").ready(true));

        let requests = triggers.requests(&Event::Certificate(key)).await;
        assert_eq!(requests, vec![Request::new(ObjectKey::new(NS, "issuer-a-tls"))]);
    }

    #[tokio::test]
    async fn test_certificate_filter() {
        let (store, triggers) = setup();
        let foreign = ObjectKey::new("other", "issuer-a");
        store.put_certificate(Certificate::new(foreign.clone(), "issuer-a-tls").ready(true));
        assert!(triggers.certificate_changed(&foreign).await.is_none());

        let unknown = ObjectKey::new(NS, "not-configured");
        store.put_certificate(Certificate::new(unknown.clone(), "x").ready(true));
        assert!(triggers.certificate_changed(&unknown).await.is_none());
    }

    #[tokio::test]
    async fn test_certificate_store_error_is_dropped() {
        let (store, triggers) = setup();
        let key = ObjectKey::new(NS, "issuer-a");
        store.put_certificate(Certificate::new(key.clone(), "issuer-a-tls").ready(true));
        store.fail(key.clone());

        assert!(triggers.certificate_changed(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_trust_anchor_targets_ca_secrets() {
        let (_, triggers) = setup();
        let requests = triggers.requests(&Event::TrustAnchor).await;
        assert_eq!(
            requests,
            vec![
                Request::new(ObjectKey::new(NS, "trust-bundle")),
                Request::new(ObjectKey::new(NS, "b-ca")),
            ]
        );
    }
}
