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

//! CLI argument definitions.

use clap::Parser;

/// anchorsync - append-only trust anchor synchronization
#[derive(Parser, Debug, Clone)]
#[command(name = "anchorsync")]
#[command(about = "Keeps derived secrets in step with issuer secrets.\n\nTrust anchors are only ever appended, never removed.")]
#[command(version)]
pub struct Cli {
    // === General ===
    /// Enable debug mode (human-readable logs)
    #[arg(long, env = "ANCHORSYNC_DEBUG", default_value = "false")]
    pub debug: bool,

    /// Log level
    #[arg(long, env = "ANCHORSYNC_LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    // === Resources ===
    /// Namespace holding the certificate and every derived secret
    #[arg(long, env = "ANCHORSYNC_NAMESPACE")]
    pub namespace: Option<String>,

    /// Certificate whose secret feeds the default trust bundle secret
    #[arg(long, env = "ANCHORSYNC_CERTIFICATE_NAME")]
    pub certificate_name: Option<String>,

    /// Derived secret written for --certificate-name
    #[arg(long, env = "ANCHORSYNC_TRUST_BUNDLE_SECRET_NAME", default_value = "trust-bundle")]
    pub trust_bundle_secret_name: String,

    /// JSON file with a list of sync specs
    #[arg(long, env = "ANCHORSYNC_SYNC_SPECS_FILE")]
    pub sync_specs_file: Option<String>,

    // === Trust anchor ===
    /// File holding the trust anchors. If unset, the CA of the certificate's
    /// secret is used.
    #[arg(long, env = "ANCHORSYNC_TRUST_ANCHOR_FILE_PATH")]
    pub trust_anchor_file_path: Option<String>,

    /// Window in milliseconds for batching file change events into one reload
    #[arg(long, env = "ANCHORSYNC_RELOAD_INTERVAL_MS", default_value = "500")]
    pub reload_interval_ms: u64,

    // === Scheduling ===
    /// Concurrent reconcile workers
    #[arg(long, env = "ANCHORSYNC_WORKERS", default_value = "2")]
    pub workers: usize,
}
