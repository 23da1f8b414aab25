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

//! Trust anchor bundles for anchorsync.
//!
//! A [`TrustAnchorBundle`] is the set of root certificates trusted by one
//! trust domain. Members are compared by their DER bytes, never by subject
//! or serial, so two re-issued roots with the same name are distinct anchors.
//!
//! [`merge`] is the append-only union used when a derived secret is brought
//! up to date: anchors are only ever added, never removed.

mod bundle;
mod error;
mod merge;

pub use bundle::TrustAnchorBundle;
pub use error::{BundleError, MergeError};
pub use merge::{Merged, merge, merge_pem};
