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

use crate::store::StoreError;
use anchorsync_bundle::{BundleError, MergeError};
use std::fmt;
use std::path::PathBuf;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// anchorsync error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error, fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Resource store read or write failed
    #[error("resource store error: {0}")]
    Store(#[from] StoreError),

    /// Source or derived bundle could not be decoded
    #[error("trust bundle error: {0}")]
    Bundle(#[from] BundleError),

    /// Trust anchor merge failed
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// The trust anchor file could not be loaded
    #[error("failed to load trust bundle from file {path:?}: {source}")]
    TrustAnchorLoad {
        path: PathBuf,
        #[source]
        source: BundleError,
    },

    /// The trust anchor file has not been loaded yet
    #[error("trust bundle is not yet loaded from file {0:?}")]
    TrustAnchorNotLoaded(PathBuf),

    /// File watch failure
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Internal invariant broken, always a bug
    #[error("this error is a bug, please report this issue: {0}")]
    InvariantViolation(String),

    /// Concurrent reconcile failures, joined
    #[error("failed to reconcile: {}", Joined(.0))]
    Reconcile(Vec<Error>),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the scheduler should back off and retry.
    ///
    /// Configuration and startup load failures terminate the process.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Config(_) | Error::TrustAnchorLoad { .. } => false,
            Error::Reconcile(errs) => errs.iter().all(Error::is_retryable),
            _ => true,
        }
    }

    /// True if this error, or any joined error, is a probable defect: a
    /// broken invariant or a bundle that fails to decode.
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            Error::InvariantViolation(_) | Error::Merge(_) | Error::Bundle(_) => true,
            Error::Reconcile(errs) => errs.iter().any(Error::is_invariant_violation),
            _ => false,
        }
    }

    /// Join concurrent failures; `None` when there were none.
    pub fn join(mut errs: Vec<Error>) -> Option<Error> {
        match errs.len() {
            0 => None,
            1 => errs.pop(),
            _ => Some(Error::Reconcile(errs)),
        }
    }
}

struct Joined<'a>(&'a [Error]);

impl fmt::Display for Joined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}
