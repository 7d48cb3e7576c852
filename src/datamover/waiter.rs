//! Concurrent wait for data mover resources to complete

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::{DEFAULT_MOVER_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::metrics;

use super::store::{MoverKind, MoverStore, ResourceRef};

/// Polls a set of tracked resources until all complete or one fails.
///
/// Each resource gets its own monitor task. The first monitor to fail or
/// time out cancels the others; cancellation is observed at the next fetch
/// or sleep, so a sibling may finish one more round-trip before it stops.
#[derive(Clone)]
pub struct CompletionWaiter {
    store: Arc<dyn MoverStore>,
    poll_interval: Duration,
    timeout: Duration,
}

impl CompletionWaiter {
    /// Waiter with the default 5s interval and 10 minute timeout
    pub fn new(store: Arc<dyn MoverStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_MOVER_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Time each resource may take, measured from the start of the wait
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait until every resource in `resources` is Completed.
    ///
    /// A resource that no longer exists counts as done. Returns the first
    /// failure observed. All monitor tasks have exited by the time this
    /// returns.
    pub async fn wait(&self, kind: MoverKind, resources: &[ResourceRef]) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let mut monitors = JoinSet::new();
        for reference in resources {
            let monitor = Monitor {
                store: self.store.clone(),
                kind,
                reference: reference.clone(),
                poll_interval: self.poll_interval,
                timeout: self.timeout,
                cancel: cancel.clone(),
            };
            let span = info_span!("mover_monitor", kind = %kind, resource = %reference);
            monitors.spawn(monitor.run().instrument(span));
        }

        let mut first_error: Option<Error> = None;
        while let Some(joined) = monitors.join_next().await {
            let outcome = joined.map_err(Error::from).and_then(|result| result);
            if let Err(e) = outcome {
                if first_error.is_none() {
                    cancel.cancel();
                    first_error = Some(e);
                } else {
                    debug!(error = %e, "Ignoring failure reported after cancellation");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(kind = %kind, count = resources.len(), "All data mover resources completed");
                Ok(())
            }
        }
    }
}

struct Monitor {
    store: Arc<dyn MoverStore>,
    kind: MoverKind,
    reference: ResourceRef,
    poll_interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Monitor {
    async fn run(self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if self.cancel.is_cancelled() {
                debug!("Wait cancelled");
                return Ok(());
            }

            let current = match self.store.get(self.kind, &self.reference).await {
                Ok(current) => current,
                Err(e) if e.is_not_found() => {
                    // Deleted by a concurrent sweep; nothing left to wait for
                    info!("{} {} no longer exists", self.kind, self.reference);
                    return Ok(());
                }
                Err(e) => {
                    return Err(e.context(format!("failed to get {} {}", self.kind, self.reference)))
                }
            };

            if current.has_failed() {
                error!(phase = %current.phase, "{} {} has failed status", self.kind, self.reference);
                metrics::MOVER_WAIT_FAILURES
                    .with_label_values(&[self.kind.resource_kind(), "failed"])
                    .inc();
                return Err(Error::MoverFailed {
                    kind: self.kind.resource_kind(),
                    namespace: self.reference.namespace.clone(),
                    name: self.reference.name.clone(),
                    phase: current.phase.to_string(),
                });
            }

            if current.is_completed() {
                info!("{} {} completed", self.kind, self.reference);
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                error!(
                    "Timed out awaiting reconciliation of {} {}",
                    self.kind, self.reference
                );
                metrics::MOVER_WAIT_FAILURES
                    .with_label_values(&[self.kind.resource_kind(), "timeout"])
                    .inc();
                return Err(Error::MoverTimeout {
                    kind: self.kind.resource_kind(),
                    namespace: self.reference.namespace.clone(),
                    name: self.reference.name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }

            let pause = self.poll_interval.min(deadline - now);
            info!(
                phase = %current.phase,
                "Waiting for {} {} to complete, retrying in {}s",
                self.kind,
                self.reference,
                pause.as_secs()
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Wait cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
