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

//! Append-only trust anchor merge.

use crate::bundle::TrustAnchorBundle;
use crate::error::MergeError;
use tracing::debug;

/// Result of a merge: `existing ∪ incoming`.
#[derive(Clone, Debug)]
pub struct Merged {
    pub bundle: TrustAnchorBundle,
    /// Number of anchors from `incoming` that were not already present
    pub added: usize,
}

impl Merged {
    /// True when at least one anchor was added
    pub fn changed(&self) -> bool {
        self.added > 0
    }
}

/// Union `incoming` into the PEM bundle held in `existing`.
///
/// `existing` may be empty. Nothing held by `existing` is ever dropped,
/// whether or not `incoming` still carries it.
pub fn merge(existing: &[u8], incoming: &TrustAnchorBundle) -> Result<Merged, MergeError> {
    let mut bundle = TrustAnchorBundle::parse(existing).map_err(MergeError::CorruptExisting)?;

    let mut added = 0;
    for anchor in incoming.iter() {
        if bundle.add(anchor.clone()) {
            added += 1;
        }
    }

    if added > 0 {
        debug!(added, total = bundle.len(), "Trust bundle is missing trust anchors");
    }

    Ok(Merged { bundle, added })
}

/// [`merge`] for an incoming bundle that is still PEM encoded.
pub fn merge_pem(existing: &[u8], incoming: &[u8]) -> Result<Merged, MergeError> {
    let incoming = TrustAnchorBundle::parse(incoming).map_err(MergeError::CorruptIncoming)?;
    merge(existing, &incoming)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pem(name: &str) -> String {
        rcgen::generate_simple_self_signed(vec![name.to_string()])
            .unwrap()
            .cert
            .pem()
    }

    #[test]
    fn test_merge_into_empty() {
        let r1 = pem("r1.example");
        let merged = merge_pem(b"", r1.as_bytes()).unwrap();
        assert!(merged.changed());
        assert_eq!(merged.bundle.len(), 1);
    }

    #[test]
    fn test_merge_adds_only_missing() {
        let r1 = pem("r1.example");
        let r2 = pem("r2.example");
        let incoming = format!("{r1}{r2}");

        let merged = merge_pem(r1.as_bytes(), incoming.as_bytes()).unwrap();
        assert!(merged.changed());
        assert_eq!(merged.added, 1);
        assert_eq!(merged.bundle.len(), 2);
    }

    #[test]
    fn test_merge_never_removes() {
        let r1 = pem("r1.example");
        let r2 = pem("r2.example");
        let existing = format!("{r1}{r2}");

        let merged = merge_pem(existing.as_bytes(), r2.as_bytes()).unwrap();
        assert!(!merged.changed());
        assert_eq!(merged.bundle.len(), 2);
    }

    #[test]
    fn test_merge_same_bundle_is_unchanged() {
        let r1 = pem("r1.example");
        let merged = merge_pem(r1.as_bytes(), r1.as_bytes()).unwrap();
        assert!(!merged.changed());
    }

    #[test]
    fn test_merge_empty_incoming() {
        let merged = merge(b"", &TrustAnchorBundle::new()).unwrap();
        assert!(!merged.changed());
        assert!(merged.bundle.is_empty());
    }

    #[test]
    fn test_merge_error_kinds_are_distinct() {
        let r1 = pem("r1.example");

        assert!(matches!(
            merge_pem(b"garbage", r1.as_bytes()),
            Err(MergeError::CorruptExisting(_))
        ));
        assert!(matches!(
            merge_pem(r1.as_bytes(), b"garbage"),
            Err(MergeError::CorruptIncoming(_))
        ));
    }
}
