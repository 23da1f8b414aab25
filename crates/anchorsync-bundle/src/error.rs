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

//! Error types.

use std::path::PathBuf;

/// Errors raised while decoding or encoding a bundle.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// The PEM framing could not be decoded
    #[error("malformed PEM: {0}")]
    Pem(String),

    /// A CERTIFICATE block did not hold a parsable X.509 certificate
    #[error("certificate #{index} is not a valid X.509 certificate: {reason}")]
    InvalidCertificate { index: usize, reason: String },

    /// Non-empty input that carried no CERTIFICATE blocks
    #[error("no certificates found in PEM data")]
    NoCertificates,

    /// A held certificate could not be written back out
    #[error("failed to encode certificate #{index} as PEM")]
    Encode { index: usize },

    /// The bundle file could not be read
    #[error("failed to read trust bundle from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by [`crate::merge`].
///
/// The two variants point at different owners: a corrupt existing bundle is
/// damage to the derived secret, a corrupt incoming bundle is a bad source.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("existing trust bundle is corrupt: {0}")]
    CorruptExisting(#[source] BundleError),

    #[error("incoming trust bundle is corrupt: {0}")]
    CorruptIncoming(#[source] BundleError),
}
