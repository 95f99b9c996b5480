//! Change notification.
//!
//! A [`ChangeFeed`] tells subscribers that something they display may be stale.
//! Notices are hints to refetch; they never carry the delta itself and are not
//! ordered across entities. Two implementations exist:
//! - [`PushFeed`]: listens on the domain event bus (preferred)
//! - [`PollingFeed`]: probes a collection fingerprint on a timer (fallback)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

pub mod poller;
pub mod push;

pub use poller::{ChangeProbe, CollectionProbe, Poller, PollingFeed, DEFAULT_POLL_INTERVAL};
pub use push::PushFeed;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    /// Collection or entity type the change belongs to.
    pub source: String,
    /// New fingerprint when the feed is probe based.
    pub fingerprint: Option<String>,
}

pub type ChangeCallback = Arc<dyn Fn(ChangeNotice) + Send + Sync>;

pub trait ChangeFeed: Send + Sync {
    /// Start delivering notices to `on_change`. Must be called inside a tokio runtime.
    fn subscribe(&self, on_change: ChangeCallback) -> Subscription;
}

/// Handle of a running feed task. Stopping is idempotent and dropping the handle stops it.
#[derive(Debug)]
pub struct Subscription {
    stopped: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    pub(crate) fn spawn<F>(stopped: Arc<AtomicBool>, task: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        Self {
            stopped,
            task: Mutex::new(Some(handle)),
        }
    }

    /// Prevent any further callback, including one whose probe is already in flight.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
