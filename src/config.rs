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

//! Configuration management.

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::store::ObjectKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default field holding the issuer certificate in a derived secret
pub const DEFAULT_CERT_KEY: &str = "issuer.crt";

/// Default field holding the issuer private key in a derived secret
pub const DEFAULT_KEY_KEY: &str = "issuer.key";

/// Default field holding the trust anchor bundle in a derived secret
pub const DEFAULT_CA_KEY: &str = "ca.crt";

/// Field names written into derived secrets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldKeys {
    #[serde(default = "default_cert_key")]
    pub cert: String,
    #[serde(default = "default_key_key")]
    pub key: String,
    #[serde(default = "default_ca_key")]
    pub ca: String,
}

impl Default for FieldKeys {
    fn default() -> Self {
        Self {
            cert: default_cert_key(),
            key: default_key_key(),
            ca: default_ca_key(),
        }
    }
}

fn default_cert_key() -> String {
    DEFAULT_CERT_KEY.to_string()
}

fn default_key_key() -> String {
    DEFAULT_KEY_KEY.to_string()
}

fn default_ca_key() -> String {
    DEFAULT_CA_KEY.to_string()
}

/// One certificate to derived secret(s) mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSpec {
    /// Source certificate, in the configured namespace
    pub certificate_name: String,

    /// Derived secret receiving the issuer certificate and key
    pub cert_secret_name: String,

    /// Derived secret receiving the trust anchor bundle. May name the same
    /// secret as `cert_secret_name`.
    #[serde(default)]
    pub ca_secret_name: Option<String>,

    #[serde(default)]
    pub keys: FieldKeys,
}

impl SyncSpec {
    /// Spec writing certificate, key and CA into one secret
    pub fn combined(certificate_name: impl Into<String>, secret_name: impl Into<String>) -> Self {
        let secret_name = secret_name.into();
        Self {
            certificate_name: certificate_name.into(),
            cert_secret_name: secret_name.clone(),
            ca_secret_name: Some(secret_name),
            keys: FieldKeys::default(),
        }
    }

    pub fn uses_ca_secret(&self) -> bool {
        self.ca_secret_name.is_some()
    }

    /// True when certificate and CA land in the same secret
    pub fn shares_secret(&self) -> bool {
        self.ca_secret_name.as_deref() == Some(self.cert_secret_name.as_str())
    }

    /// Whether this spec writes the secret `name`
    pub fn targets(&self, name: &str) -> bool {
        self.cert_secret_name == name || self.ca_secret_name.as_deref() == Some(name)
    }

    fn validate(&self) -> Result<()> {
        let empty = |field: &str| Error::Config(format!("sync spec {:?}: {} must be set", self.certificate_name, field));
        if self.certificate_name.is_empty() {
            return Err(Error::Config("sync spec: certificateName must be set".into()));
        }
        if self.cert_secret_name.is_empty() {
            return Err(empty("certSecretName"));
        }
        if self.ca_secret_name.as_deref() == Some("") {
            return Err(empty("caSecretName"));
        }
        if self.keys.cert.is_empty() || self.keys.key.is_empty() || self.keys.ca.is_empty() {
            return Err(empty("every field key"));
        }
        if self.shares_secret()
            && (self.keys.ca == self.keys.cert || self.keys.ca == self.keys.key)
        {
            return Err(Error::Config(format!(
                "sync spec {:?}: CA key {:?} collides with the certificate keys",
                self.certificate_name, self.keys.ca
            )));
        }
        Ok(())
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub debug: bool,
    pub log_level: String,

    /// Scope of every resource lookup
    pub namespace: String,
    pub sync_specs: Vec<SyncSpec>,

    /// Trust anchor file. When unset, anchors come from the source secret.
    pub trust_anchor_file: Option<PathBuf>,
    pub reload_interval: Duration,

    pub workers: usize,
}

impl Config {
    /// Build and validate a config without going through the CLI
    pub fn new(namespace: impl Into<String>, sync_specs: Vec<SyncSpec>) -> Result<Self> {
        let config = Self {
            debug: false,
            log_level: "INFO".to_string(),
            namespace: namespace.into(),
            sync_specs,
            trust_anchor_file: None,
            reload_interval: Duration::from_millis(500),
            workers: 2,
        };
        config.validate()?;
        Ok(config)
    }

    /// Key of a secret in the configured namespace
    pub fn object_key(&self, name: &str) -> ObjectKey {
        ObjectKey::new(&self.namespace, name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("--namespace must be set".into()));
        }
        if self.sync_specs.is_empty() {
            return Err(Error::Config(
                "no sync specs configured: set --certificate-name or --sync-specs-file".into(),
            ));
        }
        for spec in &self.sync_specs {
            spec.validate()?;
        }
        if self.workers == 0 {
            return Err(Error::Config("--workers must be at least 1".into()));
        }
        if let Some(path) = &self.trust_anchor_file {
            std::fs::metadata(path).map_err(|e| {
                Error::Config(format!("failed to get trust anchor file {:?}: {}", path, e))
            })?;
        }
        Ok(())
    }
}

/// Read a JSON array of sync specs
pub fn load_sync_specs(path: &Path) -> Result<Vec<SyncSpec>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read sync specs file {:?}: {}", path, e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid sync specs file {:?}: {}", path, e)))
}

impl TryFrom<Cli> for Config {
    type Error = Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let mut sync_specs = Vec::new();
        if let Some(name) = cli.certificate_name.filter(|n| !n.is_empty()) {
            sync_specs.push(SyncSpec::combined(name, cli.trust_bundle_secret_name));
        }
        if let Some(path) = &cli.sync_specs_file {
            sync_specs.extend(load_sync_specs(Path::new(path))?);
        }

        let trust_anchor_file = cli.trust_anchor_file_path.filter(|p| !p.is_empty()).map(PathBuf::from);

        let config = Self {
            debug: cli.debug,
            log_level: cli.log_level,
            namespace: cli.namespace.unwrap_or_default(),
            sync_specs,
            trust_anchor_file,
            reload_interval: Duration::from_millis(cli.reload_interval_ms),
            workers: cli.workers,
        };
        config.validate()?;

        match &config.trust_anchor_file {
            Some(path) => info!(file = %path.display(), "Using trust anchor from file"),
            None => info!("Trust anchor file not set, will use the certificate's CA"),
        }

        Ok(config)
    }
}
