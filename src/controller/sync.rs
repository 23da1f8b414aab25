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

//! Secret synchronization engine.

use super::Request;
use crate::config::{Config, SyncSpec};
use crate::error::{Error, Result};
use crate::store::{
    ObjectKey, ResourceStore, Secret, StoreError, TLS_CA_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use crate::trustanchor::AnchorSource;
use anchorsync_bundle::{MergeError, Merged, TrustAnchorBundle, merge};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Why a spec was left alone
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    CertificateMissing,
    SourceSecretMissing,
    /// The source secret lacks a certificate or private key
    SourceSecretEmpty,
    CertSecretMissing,
    CaSecretMissing,
}

/// Result of reconciling one sync spec
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Skipped(Skip),
    UpToDate,
    Updated {
        /// Issuer certificate/key fields were rewritten
        cert: bool,
        /// Anchors appended to the CA bundle
        anchors_added: usize,
        /// Store updates performed
        writes: usize,
    },
}

/// Where the CA bundle of a spec is written
enum CaTarget {
    None,
    /// Same object as the certificate secret
    Shared,
    Separate(Secret),
}

/// Reconciles derived secrets against their source certificates
pub struct SecretSync {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    specs: Vec<SyncSpec>,
    trust_anchor: Option<Arc<dyn AnchorSource>>,
}

impl SecretSync {
    /// `trust_anchor` replaces the source secret's CA when set.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        config: &Config,
        trust_anchor: Option<Arc<dyn AnchorSource>>,
    ) -> Self {
        Self {
            store,
            namespace: config.namespace.clone(),
            specs: config.sync_specs.clone(),
            trust_anchor,
        }
    }

    pub fn specs(&self) -> &[SyncSpec] {
        &self.specs
    }

    /// Reconcile every sync spec concurrently.
    ///
    /// One spec failing does not stop the others; all failures are joined
    /// into a single error.
    pub async fn reconcile(&self, request: &Request) -> Result<()> {
        let span = info_span!("reconcile", reconciled_secret = %request);
        async {
            debug!("Reconciling");
            let results = join_all(self.specs.iter().map(|spec| {
                self.reconcile_one(spec)
                    .instrument(info_span!("sync", cert_name = %spec.certificate_name))
            }))
            .await;

            let errs = results.into_iter().filter_map(|r| r.err()).collect();
            match Error::join(errs) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        .instrument(span)
        .await
    }

    /// Bring the derived secret(s) of one spec in line with its source.
    pub async fn reconcile_one(&self, spec: &SyncSpec) -> Result<Outcome> {
        let cert_key = self.key(&spec.certificate_name);
        let Some(cert) = absent_ok(self.store.get_certificate(&cert_key).await)? else {
            debug!("Certificate does not exist");
            return Ok(Outcome::Skipped(Skip::CertificateMissing));
        };
        debug!("Found certificate");

        let source_key = cert.secret_key();
        let Some(source) = absent_ok(self.store.get_secret(&source_key).await)? else {
            debug!(secret = %source_key, "Certificate secret does not exist");
            return Ok(Outcome::Skipped(Skip::SourceSecretMissing));
        };
        debug!(secret = %source_key, "Found certificate secret");

        let cert_secret_key = self.key(&spec.cert_secret_name);
        let Some(mut cert_secret) = absent_ok(self.store.get_secret(&cert_secret_key).await)? else {
            error!(secret = %cert_secret_key, "Derived certificate secret does not exist");
            return Ok(Outcome::Skipped(Skip::CertSecretMissing));
        };

        let mut ca_target = match &spec.ca_secret_name {
            None => CaTarget::None,
            Some(_) if spec.shares_secret() => CaTarget::Shared,
            Some(name) => {
                let key = self.key(name);
                match absent_ok(self.store.get_secret(&key).await)? {
                    Some(secret) => CaTarget::Separate(secret),
                    None => {
                        error!(secret = %key, "Derived CA secret does not exist");
                        return Ok(Outcome::Skipped(Skip::CaSecretMissing));
                    }
                }
            }
        };
        debug!(secret = %cert_secret_key, "Found derived secrets");

        let tls_cert = source.field(TLS_CERT_KEY);
        let tls_key = source.field(TLS_PRIVATE_KEY_KEY);
        if tls_cert.is_empty() || tls_key.is_empty() {
            debug!(secret = %source_key, "Certificate secret has no data");
            return Ok(Outcome::Skipped(Skip::SourceSecretEmpty));
        }

        let cert_stale = cert_secret.field(&spec.keys.cert) != tls_cert
            || cert_secret.field(&spec.keys.key) != tls_key;
        if cert_stale {
            debug!("Derived certificate secret does not match certificate secret");
        }

        let ca_update = match &ca_target {
            CaTarget::None => None,
            CaTarget::Shared => self.plan_ca(spec, &source, &cert_secret)?,
            CaTarget::Separate(secret) => self.plan_ca(spec, &source, secret)?,
        };

        if !cert_stale && ca_update.is_none() {
            info!("Trust bundle secret is up to date");
            return Ok(Outcome::UpToDate);
        }

        info!("Updating derived secrets");

        let anchors_added = ca_update.as_ref().map_or(0, |m| m.added);
        let ca_pem = ca_update.map(|merged| encode(&merged)).transpose()?;
        let mut writes = 0;

        // Unrelated keys are kept: the secret may be shared with other consumers.
        if cert_stale {
            cert_secret
                .data
                .insert(spec.keys.cert.clone(), tls_cert.to_vec());
            cert_secret
                .data
                .insert(spec.keys.key.clone(), tls_key.to_vec());
        }
        if let (CaTarget::Shared, Some(pem)) = (&ca_target, &ca_pem) {
            cert_secret.data.insert(spec.keys.ca.clone(), pem.clone());
        }
        if cert_stale || matches!((&ca_target, &ca_pem), (CaTarget::Shared, Some(_))) {
            self.store.update_secret(&cert_secret).await?;
            writes += 1;
        }

        if let (CaTarget::Separate(ca_secret), Some(pem)) = (&mut ca_target, ca_pem) {
            ca_secret.data.insert(spec.keys.ca.clone(), pem);
            self.store.update_secret(ca_secret).await?;
            writes += 1;
        }

        Ok(Outcome::Updated {
            cert: cert_stale,
            anchors_added,
            writes,
        })
    }

    /// The merged bundle to write, or `None` if the CA field is current.
    fn plan_ca(&self, spec: &SyncSpec, source: &Secret, holder: &Secret) -> Result<Option<Merged>> {
        let incoming = self.candidate_anchors(source)?;
        let existing = holder.data.get(&spec.keys.ca);

        let merged = merge(existing.map(Vec::as_slice).unwrap_or_default(), &incoming)
            .inspect_err(|e| error!(error = %e, secret = %holder.key, "Failed to parse trust anchors"))?;

        if merged.changed() || existing.is_none() {
            debug!(added = merged.added, "Derived CA bundle is missing trust anchors");
            return Ok(Some(merged));
        }

        debug!("Derived secret has correct issuer and all required trust anchors");
        Ok(None)
    }

    /// Anchors the derived bundle must contain.
    fn candidate_anchors(&self, source: &Secret) -> Result<Arc<TrustAnchorBundle>> {
        if let Some(trust_anchor) = &self.trust_anchor {
            return trust_anchor.current_bundle();
        }

        let ca = source.field(TLS_CA_KEY);
        if ca.is_empty() {
            warn!(secret = %source.key, "No trust anchor found in certificate secret, the root trust anchor may be empty!");
            return Ok(Arc::new(TrustAnchorBundle::new()));
        }

        TrustAnchorBundle::parse(ca).map(Arc::new).map_err(|e| {
            error!(error = %e, secret = %source.key, "Failed to parse trust anchor from certificate secret");
            MergeError::CorruptIncoming(e).into()
        })
    }

    fn key(&self, name: &str) -> ObjectKey {
        ObjectKey::new(&self.namespace, name)
    }
}

/// Encode a freshly merged bundle. Failure here means the bundle we just
/// parsed cannot be written back, which is a bug.
fn encode(merged: &Merged) -> Result<Vec<u8>> {
    merged.bundle.to_pem().map_err(|e| {
        error!(error = %e, "Failed to marshal trust anchor, this error is a bug, please report the issue");
        Error::InvariantViolation(format!("failed to marshal trust anchor: {}", e))
    })
}

/// Absence is not an error: map `NotFound` to `None`.
fn absent_ok<T>(result: std::result::Result<T, StoreError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}
