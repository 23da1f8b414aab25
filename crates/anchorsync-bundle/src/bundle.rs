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

//! The bundle type and its PEM codec.

use crate::error::BundleError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls_pki_types::CertificateDer;
use rustls_pki_types::pem::PemObject;

const PEM_BEGIN: &[u8] = b"-----BEGIN CERTIFICATE-----\n";
const PEM_END: &[u8] = b"-----END CERTIFICATE-----\n";
const PEM_LINE_WIDTH: usize = 64;

/// Unordered set of trust anchors, keyed by DER bytes.
///
/// Insertion order is kept so that encoding is stable across runs, but it
/// carries no meaning: equality is set equality.
#[derive(Clone, Debug, Default)]
pub struct TrustAnchorBundle {
    authorities: Vec<CertificateDer<'static>>,
}

impl TrustAnchorBundle {
    /// Create an empty bundle
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a concatenation of PEM certificates.
    ///
    /// Empty or whitespace-only input yields an empty bundle. Every
    /// CERTIFICATE block must hold a parsable X.509 certificate; blocks of
    /// any other type are skipped. Duplicate certificates collapse into one.
    pub fn parse(pem: &[u8]) -> Result<Self, BundleError> {
        let mut bundle = Self::new();
        if pem.iter().all(u8::is_ascii_whitespace) {
            return Ok(bundle);
        }

        for (index, der) in CertificateDer::pem_slice_iter(pem).enumerate() {
            let der = der.map_err(|e| BundleError::Pem(e.to_string()))?;
            x509_parser::parse_x509_certificate(der.as_ref()).map_err(|e| {
                BundleError::InvalidCertificate {
                    index,
                    reason: e.to_string(),
                }
            })?;
            bundle.add(der);
        }

        if bundle.is_empty() {
            return Err(BundleError::NoCertificates);
        }
        Ok(bundle)
    }

    /// Encode every anchor as a PEM CERTIFICATE block.
    pub fn to_pem(&self) -> Result<Vec<u8>, BundleError> {
        let mut out = Vec::new();
        for (index, der) in self.authorities.iter().enumerate() {
            if der.as_ref().is_empty() {
                return Err(BundleError::Encode { index });
            }
            let body = STANDARD.encode(der.as_ref());
            out.extend_from_slice(PEM_BEGIN);
            for line in body.as_bytes().chunks(PEM_LINE_WIDTH) {
                out.extend_from_slice(line);
                out.push(b'\n');
            }
            out.extend_from_slice(PEM_END);
        }
        Ok(out)
    }

    /// Add an anchor. Returns `false` when the same bytes are already held.
    pub fn add(&mut self, der: CertificateDer<'static>) -> bool {
        if self.contains(der.as_ref()) {
            return false;
        }
        self.authorities.push(der);
        true
    }

    /// Membership by DER byte identity
    pub fn contains(&self, der: &[u8]) -> bool {
        self.authorities.iter().any(|held| held.as_ref() == der)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CertificateDer<'static>> {
        self.authorities.iter()
    }

    pub fn len(&self) -> usize {
        self.authorities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorities.is_empty()
    }

    /// True when every anchor in `self` is also held by `other`
    pub fn is_subset_of(&self, other: &TrustAnchorBundle) -> bool {
        self.iter().all(|der| other.contains(der.as_ref()))
    }
}

impl PartialEq for TrustAnchorBundle {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.is_subset_of(other)
    }
}

impl Eq for TrustAnchorBundle {}

impl FromIterator<CertificateDer<'static>> for TrustAnchorBundle {
    fn from_iter<I: IntoIterator<Item = CertificateDer<'static>>>(iter: I) -> Self {
        let mut bundle = Self::new();
        for der in iter {
            bundle.add(der);
        }
        bundle
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn root(name: &str) -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap()
    }

    #[test]
    fn test_parse_empty_is_empty_bundle() {
        assert!(TrustAnchorBundle::parse(b"").unwrap().is_empty());
        assert!(TrustAnchorBundle::parse(b" \n\t\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_concatenated_pem() {
        let a = root("root-a.example");
        let b = root("root-b.example");
        let pem = format!("{}{}", a.cert.pem(), b.cert.pem());

        let bundle = TrustAnchorBundle::parse(pem.as_bytes()).unwrap();
        assert_eq!(bundle.len(), 2);
        assert!(bundle.contains(a.cert.der().as_ref()));
        assert!(bundle.contains(b.cert.der().as_ref()));
    }

    #[test]
    fn test_parse_collapses_duplicates() {
        let a = root("root-a.example");
        let pem = format!("{}{}", a.cert.pem(), a.cert.pem());

        let bundle = TrustAnchorBundle::parse(pem.as_bytes()).unwrap();
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn test_parse_skips_private_keys() {
        let a = root("root-a.example");
        let pem = format!("{}{}", a.key_pair.serialize_pem(), a.cert.pem());

        let bundle = TrustAnchorBundle::parse(pem.as_bytes()).unwrap();
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            TrustAnchorBundle::parse(b"not a certificate"),
            Err(BundleError::NoCertificates)
        ));

        let bogus = "-----BEGIN CERTIFICATE-----\naGVsbG8gd29ybGQ=\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            TrustAnchorBundle::parse(bogus.as_bytes()),
            Err(BundleError::InvalidCertificate { index: 0, .. })
        ));
    }

    #[test]
    fn test_to_pem_reparses_to_same_set() {
        let a = root("root-a.example");
        let b = root("root-b.example");
        let bundle: TrustAnchorBundle = [a.cert.der().clone(), b.cert.der().clone()]
            .into_iter()
            .collect();

        let pem = bundle.to_pem().unwrap();
        let text = String::from_utf8(pem.clone()).unwrap();
        assert_eq!(text.matches("-----BEGIN CERTIFICATE-----").count(), 2);
        assert!(text.lines().all(|line| line.len() <= PEM_LINE_WIDTH));

        assert_eq!(TrustAnchorBundle::parse(&pem).unwrap(), bundle);
    }

    #[test]
    fn test_to_pem_empty_bundle() {
        assert!(TrustAnchorBundle::new().to_pem().unwrap().is_empty());
    }

    #[test]
    fn test_to_pem_rejects_empty_der() {
        let mut bundle = TrustAnchorBundle::new();
        bundle.add(CertificateDer::from(Vec::new()));
        assert!(matches!(
            bundle.to_pem(),
            Err(BundleError::Encode { index: 0 })
        ));
    }

    #[test]
    fn test_equality_ignores_order() {
        let a = root("root-a.example").cert.der().clone();
        let b = root("root-b.example").cert.der().clone();

        let ab: TrustAnchorBundle = [a.clone(), b.clone()].into_iter().collect();
        let ba: TrustAnchorBundle = [b, a.clone()].into_iter().collect();
        let only_a: TrustAnchorBundle = [a].into_iter().collect();

        assert_eq!(ab, ba);
        assert_ne!(ab, only_a);
        assert!(only_a.is_subset_of(&ab));
    }
}
