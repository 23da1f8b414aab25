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

//! Trust bundle controller.
//!
//! The reconciler treats the issuer's secret as the source of truth and
//! brings every configured derived secret in line with it. Trust anchors
//! are always appended to a derived bundle and never removed.

mod queue;
mod sync;
mod trigger;

pub use queue::{WorkQueue, backoff};
pub use sync::{Outcome, SecretSync, Skip};
pub use trigger::{Event, Triggers};

use crate::store::ObjectKey;
use std::fmt;

/// A reconcile request, keyed by the secret that triggered it
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Request {
    pub key: ObjectKey,
}

impl Request {
    pub fn new(key: ObjectKey) -> Self {
        Self { key }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}
