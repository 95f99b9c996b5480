use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::time::MissedTickBehavior;

use super::{ChangeCallback, ChangeFeed, ChangeNotice, Subscription};
use crate::gateway::{DataGateway, GatewayResult, Query};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// An idempotent "has anything changed" probe. Returns an opaque fingerprint.
#[async_trait]
pub trait ChangeProbe: Send + Sync {
    fn source(&self) -> &str;

    async fn probe(&self) -> GatewayResult<String>;
}

pub struct Poller;

impl Poller {
    /// Probe immediately, then once per `interval`. Cycles are strictly sequential:
    /// a tick that comes due while a probe is still running is skipped.
    ///
    /// The first successful probe sets the baseline; `on_change` fires whenever a
    /// later fingerprint differs from the previous one. Failed probes are logged
    /// and the timer keeps running.
    pub fn start(interval: Duration, probe: Arc<dyn ChangeProbe>, on_change: ChangeCallback) -> Subscription {
        let stopped = Arc::new(AtomicBool::new(false));

        let task = {
            let stopped = Arc::clone(&stopped);
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut last: Option<String> = None;

                loop {
                    ticker.tick().await;
                    if stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    // one task owns the loop, so a probe never overlaps the next tick;
                    // ticks missed while it runs are skipped
                    let result = probe.probe().await;

                    // stale-response guard: stop() may have run while the probe was awaited
                    if stopped.load(Ordering::SeqCst) {
                        break;
                    }

                    match result {
                        Ok(fingerprint) => {
                            let changed = last.as_ref().is_some_and(|prev| *prev != fingerprint);
                            last = Some(fingerprint.clone());
                            if changed {
                                tracing::debug!(source = %probe.source(), "change detected");
                                on_change(ChangeNotice {
                                    source: probe.source().to_string(),
                                    fingerprint: Some(fingerprint),
                                });
                            }
                        }
                        Err(e) => {
                            tracing::warn!(source = %probe.source(), error = %e, "change probe failed");
                        }
                    }
                }
            }
        };

        Subscription::spawn(stopped, task)
    }
}

/// Fingerprints a collection (optionally narrowed by a query) from the ids,
/// update times and contents of its records.
pub struct CollectionProbe {
    gateway: Arc<dyn DataGateway>,
    collection: String,
    query: Query,
}

impl CollectionProbe {
    pub fn new(gateway: Arc<dyn DataGateway>, collection: &str) -> Self {
        Self::with_query(gateway, collection, Query::new())
    }

    pub fn with_query(gateway: Arc<dyn DataGateway>, collection: &str, query: Query) -> Self {
        Self {
            gateway,
            collection: collection.to_string(),
            query,
        }
    }
}

pub async fn fingerprint(gateway: &dyn DataGateway, collection: &str, query: &Query) -> GatewayResult<String> {
    let mut records = gateway.read(collection, query).await?;
    records.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = Sha256::new();
    for record in &records {
        hasher.update(record.id.as_bytes());
        hasher.update(record.updated_at.to_rfc3339().as_bytes());
        hasher.update(record.data.to_string().as_bytes());
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[async_trait]
impl ChangeProbe for CollectionProbe {
    fn source(&self) -> &str {
        &self.collection
    }

    async fn probe(&self) -> GatewayResult<String> {
        fingerprint(self.gateway.as_ref(), &self.collection, &self.query).await
    }
}

/// Polling fallback for environments without push delivery.
pub struct PollingFeed {
    probe: Arc<dyn ChangeProbe>,
    interval: Duration,
}

impl PollingFeed {
    pub fn new(probe: Arc<dyn ChangeProbe>, interval: Duration) -> Self {
        Self { probe, interval }
    }
}

impl ChangeFeed for PollingFeed {
    fn subscribe(&self, on_change: ChangeCallback) -> Subscription {
        Poller::start(self.interval, Arc::clone(&self.probe), on_change)
    }
}
