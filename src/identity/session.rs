use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use super::{EmployeeDirectory, IdentityProvider};
use crate::authz::{resolve, CapabilityFlags, Principal};
use crate::feed::{ChangeCallback, ChangeFeed, Subscription};
use crate::gateway::{GatewayError, GatewayResult};

/// Where a session loads the signed-in employee's profile from.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn load(&self, id: Uuid) -> GatewayResult<Option<Principal>>;
}

#[async_trait]
impl ProfileSource for EmployeeDirectory {
    async fn load(&self, id: Uuid) -> GatewayResult<Option<Principal>> {
        self.get(id).await
    }
}

/// A long-lived signed-in session (CLI, worker, embedded client).
///
/// The profile is refetched on [`refresh`](Session::refresh) and every observer of
/// [`changes`](IdentityProvider::changes) sees the new value, so flags derived from
/// it never go stale.
pub struct Session<S> {
    source: Arc<S>,
    employee_id: Mutex<Option<Uuid>>,
    current: watch::Sender<Option<Principal>>,
    // serializes refetches so an older response never overwrites a newer one
    refresh_lock: tokio::sync::Mutex<()>,
    following: Mutex<Option<Subscription>>,
}

impl<S: ProfileSource + 'static> Session<S> {
    pub fn new(source: Arc<S>) -> Arc<Self> {
        let (current, _) = watch::channel(None);
        Arc::new(Self {
            source,
            employee_id: Mutex::new(None),
            current,
            refresh_lock: tokio::sync::Mutex::new(()),
            following: Mutex::new(None),
        })
    }

    fn signed_in_id(&self) -> Option<Uuid> {
        match self.employee_id.lock() {
            Ok(id) => *id,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_signed_in_id(&self, id: Option<Uuid>) {
        match self.employee_id.lock() {
            Ok(mut slot) => *slot = id,
            Err(poisoned) => *poisoned.into_inner() = id,
        }
    }

    pub async fn sign_in(&self, employee_id: Uuid) -> GatewayResult<Principal> {
        let _guard = self.refresh_lock.lock().await;
        let principal = self
            .source
            .load(employee_id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("employee {employee_id}")))?;

        self.set_signed_in_id(Some(employee_id));
        self.current.send_replace(Some(principal.clone()));
        tracing::info!(employee_id = %employee_id, "session signed in");
        Ok(principal)
    }

    pub fn sign_out(&self) {
        self.set_signed_in_id(None);
        self.current.send_if_modified(|current| current.take().is_some());
        if let Some(subscription) = self.take_following() {
            subscription.stop();
        }
    }

    /// Refetch the profile. Observers are only woken when it actually changed.
    pub async fn refresh(&self) -> GatewayResult<()> {
        let _guard = self.refresh_lock.lock().await;
        let Some(id) = self.signed_in_id() else {
            return Ok(());
        };

        let latest = self.source.load(id).await?;
        // sign_out may have raced the fetch
        if self.signed_in_id() != Some(id) {
            return Ok(());
        }
        if latest.is_none() {
            tracing::warn!(employee_id = %id, "signed-in employee no longer exists");
        }

        self.current.send_if_modified(|current| {
            if *current == latest {
                false
            } else {
                *current = latest;
                true
            }
        });
        Ok(())
    }

    /// Refresh whenever `feed` reports a change. Replaces any previous feed.
    pub fn follow(self: &Arc<Self>, feed: &dyn ChangeFeed) {
        let session = Arc::downgrade(self);
        let on_change: ChangeCallback = Arc::new(move |_notice| {
            let Some(session) = session.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                if let Err(e) = session.refresh().await {
                    tracing::warn!(error = %e, "failed to refresh session profile");
                }
            });
        });

        let subscription = feed.subscribe(on_change);
        let previous = match self.following.lock() {
            Ok(mut slot) => slot.replace(subscription),
            Err(poisoned) => poisoned.into_inner().replace(subscription),
        };
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    fn take_following(&self) -> Option<Subscription> {
        match self.following.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn flags(&self) -> CapabilityFlags {
        resolve(self.current.borrow().as_ref())
    }
}

impl<S: ProfileSource + 'static> IdentityProvider for Session<S> {
    fn current_principal(&self) -> Option<Principal> {
        self.current.borrow().clone()
    }

    fn changes(&self) -> watch::Receiver<Option<Principal>> {
        self.current.subscribe()
    }
}
