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

//! Runs the trust anchor source and the reconcile workers.

use crate::config::Config;
use crate::controller::{Event, Request, SecretSync, Triggers, WorkQueue};
use crate::error::{Error, Result};
use crate::store::ResourceStore;
use crate::trustanchor::{AnchorSource, Options, Subscription, TrustAnchorSource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Wires the trust anchor source, trigger correlation and the sync engine
/// around one work queue.
pub struct Manager {
    config: Config,
    trust_anchor: Option<Arc<TrustAnchorSource>>,
    sync: Arc<SecretSync>,
    triggers: Arc<Triggers>,
    queue: Arc<WorkQueue>,
}

impl Manager {
    /// Create a manager. A trust anchor source is built when the config
    /// names a trust anchor file.
    pub fn new(config: Config, store: Arc<dyn ResourceStore>) -> Self {
        let trust_anchor = config.trust_anchor_file.clone().map(|path| {
            Arc::new(TrustAnchorSource::new(Options {
                path,
                reload_interval: config.reload_interval,
            }))
        });
        let anchors = trust_anchor
            .clone()
            .map(|source| source as Arc<dyn AnchorSource>);

        let sync = Arc::new(SecretSync::new(store.clone(), &config, anchors));
        let triggers = Arc::new(Triggers::new(store, &config));

        Self {
            config,
            trust_anchor,
            sync,
            triggers,
            queue: Arc::new(WorkQueue::new()),
        }
    }

    pub fn trust_anchor(&self) -> Option<&Arc<TrustAnchorSource>> {
        self.trust_anchor.as_ref()
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run until `token` is cancelled or a task fails fatally.
    ///
    /// `events` carries changes from the watch layer. Every derived secret
    /// is reconciled once at startup.
    pub async fn run(self, events: mpsc::Receiver<Event>, token: CancellationToken) -> Result<()> {
        let token = token.child_token();
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        info!(
            namespace = %self.config.namespace,
            sync_specs = self.config.sync_specs.len(),
            workers = self.config.workers,
            trust_anchor_file = self.trust_anchor.is_some(),
            "Starting manager"
        );

        // Runs on every replica, leader or not.
        if let Some(source) = &self.trust_anchor {
            let subscription = source.subscribe();
            let source = source.clone();
            let run_token = token.clone();
            tasks.spawn(async move { source.run(run_token).await });
            tasks.spawn(forward_anchor_changes(
                subscription,
                self.triggers.clone(),
                self.queue.clone(),
                token.clone(),
            ));
        }

        tasks.spawn(pump_events(
            events,
            self.triggers.clone(),
            self.queue.clone(),
            token.clone(),
        ));

        for id in 0..self.config.workers {
            tasks.spawn(worker(id, self.sync.clone(), self.queue.clone(), token.clone()));
        }

        for spec in self.sync.specs() {
            self.queue
                .add(Request::new(self.config.object_key(&spec.cert_secret_name)));
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => Error::InvariantViolation(format!("manager task panicked: {}", e)),
            };
            error!(error = %err, "Manager task failed, stopping");
            if result.is_ok() {
                result = Err(err);
            }
            token.cancel();
        }

        self.queue.shut_down();
        self.queue.drained().await;
        info!("Manager stopped");
        result
    }
}

async fn forward_anchor_changes(
    mut subscription: Subscription,
    triggers: Arc<Triggers>,
    queue: Arc<WorkQueue>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            notified = subscription.recv() => {
                if notified.is_none() {
                    return Ok(());
                }
                debug!("Trust anchors reloaded");
                for request in triggers.trust_anchor_changed() {
                    queue.add(request);
                }
            }
        }
    }
}

async fn pump_events(
    mut events: mpsc::Receiver<Event>,
    triggers: Arc<Triggers>,
    queue: Arc<WorkQueue>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            event = events.recv() => event,
        };
        let Some(event) = event else {
            debug!("Event stream closed");
            return Ok(());
        };
        for request in triggers.requests(&event).await {
            queue.add(request);
        }
    }
}

async fn worker(
    id: usize,
    sync: Arc<SecretSync>,
    queue: Arc<WorkQueue>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        let request = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            request = queue.get() => match request {
                Some(request) => request,
                None => return Ok(()),
            },
        };

        let result = tokio::select! {
            _ = token.cancelled() => {
                queue.done(&request);
                return Ok(());
            }
            result = sync.reconcile(&request) => result,
        };

        match result {
            Ok(()) => queue.forget(&request),
            Err(e) => {
                let delay = queue.requeue_rate_limited(request.clone());
                if e.is_invariant_violation() {
                    error!(worker = id, request = %request, error = %e, retry_in = ?delay, "Reconcile hit a probable defect, requeueing");
                } else {
                    warn!(worker = id, request = %request, error = %e, retry_in = ?delay, "Reconcile failed, requeueing");
                }
            }
        }
        queue.done(&request);
    }
}
