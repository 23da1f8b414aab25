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

//! Hot-reloaded trust anchor source.
//!
//! [`TrustAnchorSource`] holds the trust anchors read from a PEM file and
//! reloads them whenever the containing directory changes. The directory is
//! watched rather than the file so that atomic replace-by-rename (and the
//! symlink swap used by mounted volumes) is seen.
//!
//! Every successful reload notifies each [`Subscription`] once. Deliveries
//! run concurrently, one task per subscriber, and are abandoned when the
//! source stops; a slow subscriber never blocks a reload.

use crate::error::{Error, Result};
use anchorsync_bundle::{BundleError, TrustAnchorBundle};
use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Anything the reconciler can read trust anchors from
pub trait AnchorSource: Send + Sync {
    /// The last successfully loaded bundle
    fn current_bundle(&self) -> Result<Arc<TrustAnchorBundle>>;
}

/// Trust anchor source options
#[derive(Debug, Clone)]
pub struct Options {
    /// PEM file holding the trust anchors
    pub path: PathBuf,
    /// Change events closer together than this are folded into one reload
    pub reload_interval: Duration,
}

/// File-backed, hot-reloaded trust anchors
pub struct TrustAnchorSource {
    path: PathBuf,
    reload_interval: Duration,
    bundle: RwLock<Option<Arc<TrustAnchorBundle>>>,
    subscribers: Arc<Subscribers>,
    broadcasts: TaskTracker,
}

impl TrustAnchorSource {
    pub fn new(options: Options) -> Self {
        Self {
            path: options.path,
            reload_interval: options.reload_interval,
            bundle: RwLock::new(None),
            subscribers: Arc::new(Subscribers::default()),
            broadcasts: TaskTracker::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Always false: every replica needs the anchors for its own decisions.
    pub fn needs_leader_election(&self) -> bool {
        false
    }

    /// Register for reload notifications.
    ///
    /// Only reloads after this call are delivered. Dropping the returned
    /// handle unregisters it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(1);
        let id = self.subscribers.insert(tx);
        debug!(subscriber = id, "Trust anchor subscriber registered");
        Subscription {
            id,
            rx,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Notifications still being delivered
    pub fn pending_broadcasts(&self) -> usize {
        self.broadcasts.len()
    }

    /// Load the anchors, then watch for changes until `token` is cancelled.
    ///
    /// Fails if the first load fails, if a later reload cannot be parsed, or
    /// if the watcher itself fails. Cancellation is a clean stop.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(path = %self.path.display(), "Starting trust anchor source");

        let bundle = self.load().await?;

        let dir = watch_dir(&self.path);
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        debug!(dir = %dir.display(), "Watching trust anchor directory");

        let token = token.child_token();
        let _stop_broadcasts = token.clone().drop_guard();

        self.update_bundle(bundle, &token);
        let result = self.watch(&mut events, &token).await;

        token.cancel();
        self.broadcasts.close();
        self.broadcasts.wait().await;
        self.broadcasts.reopen();

        info!(path = %self.path.display(), "Stopped trust anchor source");
        result
    }

    async fn watch(
        &self,
        events: &mut mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
        token: &CancellationToken,
    ) -> Result<()> {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                event = events.recv() => event,
            };

            match event {
                None => return Err(notify::Error::generic("file watcher stopped").into()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(event)) if matches!(event.kind, EventKind::Access(_)) => continue,
                Some(Ok(event)) => debug!(kind = ?event.kind, paths = ?event.paths, "Trust anchor directory changed"),
            }

            // Fold the rest of a burst (write, chmod, rename) into one reload.
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.reload_interval) => {}
            }
            while let Ok(event) = events.try_recv() {
                event?;
            }

            let bundle = self.load().await?;
            self.update_bundle(bundle, token);
        }
    }

    async fn load(&self) -> Result<TrustAnchorBundle> {
        let load_error = |source| Error::TrustAnchorLoad {
            path: self.path.clone(),
            source,
        };

        let pem = tokio::fs::read(&self.path).await.map_err(|source| {
            load_error(BundleError::Read {
                path: self.path.clone(),
                source,
            })
        })?;
        let bundle = TrustAnchorBundle::parse(&pem).map_err(load_error)?;
        if bundle.is_empty() {
            return Err(load_error(BundleError::NoCertificates));
        }
        Ok(bundle)
    }

    /// Swap in `bundle` and notify every live subscriber.
    fn update_bundle(&self, bundle: TrustAnchorBundle, token: &CancellationToken) {
        let anchors = bundle.len();
        *self.bundle.write().unwrap() = Some(Arc::new(bundle));

        let channels = self.subscribers.live();
        info!(anchors, subscribers = channels.len(), "Loaded trust anchors");

        for (id, tx) in channels {
            let token = token.clone();
            self.broadcasts.spawn(async move {
                tokio::select! {
                    sent = tx.send(()) => {
                        if sent.is_err() {
                            debug!(subscriber = id, "Trust anchor subscriber went away");
                        }
                    }
                    _ = token.cancelled() => {
                        warn!(subscriber = id, "Abandoned trust anchor notification");
                    }
                }
            });
        }
    }
}

impl AnchorSource for TrustAnchorSource {
    fn current_bundle(&self) -> Result<Arc<TrustAnchorBundle>> {
        self.bundle
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::TrustAnchorNotLoaded(self.path.clone()))
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

// ============================================================================
// Subscribers
// ============================================================================

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    channels: Mutex<HashMap<u64, mpsc::Sender<()>>>,
}

impl Subscribers {
    fn insert(&self, tx: mpsc::Sender<()>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels.lock().unwrap().insert(id, tx);
        id
    }

    fn remove(&self, id: u64) {
        self.channels.lock().unwrap().remove(&id);
    }

    fn len(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    /// Open channels; closed ones are pruned on the way.
    fn live(&self) -> Vec<(u64, mpsc::Sender<()>)> {
        let mut channels = self.channels.lock().unwrap();
        channels.retain(|_, tx| !tx.is_closed());
        channels.iter().map(|(id, tx)| (*id, tx.clone())).collect()
    }
}

/// Receives one notification per trust anchor reload
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<()>,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next reload. `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
