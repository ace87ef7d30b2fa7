//! Tracks `callJsFunction` pushes until the client reports a result.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::hub::ClientId;

#[derive(Clone)]
pub struct InvocationTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    /// Send times per (client, function), oldest first.
    pending: DashMap<(ClientId, String), VecDeque<Instant>>,
    timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub client: ClientId,
    pub function: String,
    pub count: usize,
}

impl InvocationTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                pending: DashMap::new(),
                timeout,
            }),
        }
    }

    pub fn record(&self, client: ClientId, function: &str) {
        self.inner
            .pending
            .entry((client, function.to_string()))
            .or_default()
            .push_back(Instant::now());
    }

    /// Clears the oldest outstanding push of `function` to `client`.
    /// Returns false for results nobody asked for.
    pub fn acknowledge(&self, client: ClientId, function: &str) -> bool {
        let key = (client, function.to_string());
        let Some(mut sent) = self.inner.pending.get_mut(&key) else {
            return false;
        };
        let cleared = sent.pop_front().is_some();
        let empty = sent.is_empty();
        drop(sent);
        if empty {
            self.inner.pending.remove_if(&key, |_, sent| sent.is_empty());
        }
        cleared
    }

    pub fn outstanding(&self) -> usize {
        self.inner.pending.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn forget_client(&self, client: ClientId) {
        self.inner.pending.retain(|(owner, _), _| *owner != client);
    }

    /// Drops every push older than the acknowledgement timeout.
    pub fn expire(&self, now: Instant) -> Vec<Expired> {
        let mut expired = Vec::new();
        for mut entry in self.inner.pending.iter_mut() {
            let before = entry.value().len();
            let timeout = self.inner.timeout;
            entry
                .value_mut()
                .retain(|sent| now.saturating_duration_since(*sent) < timeout);
            let count = before - entry.value().len();
            if count > 0 {
                let (client, function) = entry.key().clone();
                expired.push(Expired {
                    client,
                    function,
                    count,
                });
            }
        }
        self.inner.pending.retain(|_, sent| !sent.is_empty());
        expired
    }

    pub fn spawn_recycler(&self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let tracker = self.clone();
        let mut interval = tokio::time::interval(period);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                for lost in tracker.expire(Instant::now()) {
                    warn!(
                        client = %lost.client,
                        function = %lost.function,
                        count = lost.count,
                        "no result for pushed function call"
                    );
                    counter!(
                        "ticker_device_invocations_unanswered_total",
                        lost.count as u64,
                        "function" => lost.function.clone()
                    );
                }
            }
            debug!("invocation recycler stopped");
        })
    }
}
