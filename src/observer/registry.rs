use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tracing::{debug, error};

use crate::state::AppState;
use crate::unwind;

/// Receives the inferred state after every delivery pass
pub trait AppStateChangeListener: Send + Sync {
    fn on_app_state_change(&self, state: AppState) -> anyhow::Result<()>;
}

impl<F> AppStateChangeListener for F
where
    F: Fn(AppState) -> anyhow::Result<()> + Send + Sync,
{
    fn on_app_state_change(&self, state: AppState) -> anyhow::Result<()> {
        self(state)
    }
}

/// Unique identifier for a registered listener
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// A listener that failed during delivery. Logged, never propagated.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("{id} failed: {reason:#}")]
    Failed { id: SubscriptionId, reason: anyhow::Error },

    #[error("{id} panicked: {message}")]
    Panicked { id: SubscriptionId, message: String },
}

struct Registration {
    id: SubscriptionId,
    listener: Arc<dyn AppStateChangeListener>,
    active: AtomicBool,
}

impl Registration {
    fn invoke(&self, state: AppState) -> Result<(), ListenerError> {
        match unwind::catch(|| self.listener.on_app_state_change(state)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ListenerError::Failed { id: self.id, reason }),
            Err(message) => Err(ListenerError::Panicked { id: self.id, message }),
        }
    }
}

/// Ordered listener list shared between subscribe/unsubscribe and delivery
#[derive(Default)]
pub(super) struct ListenerRegistry {
    entries: Mutex<Vec<Arc<Registration>>>,
    next_id: AtomicU64,
    ever_subscribed: AtomicBool,
}

impl ListenerRegistry {
    pub(super) fn add(this: &Arc<Self>, listener: Arc<dyn AppStateChangeListener>) -> Subscription {
        let id = SubscriptionId(this.next_id.fetch_add(1, Ordering::SeqCst));
        this.lock().push(Arc::new(Registration {
            id,
            listener,
            active: AtomicBool::new(true),
        }));
        this.ever_subscribed.store(true, Ordering::SeqCst);

        debug!(%id, "listener subscribed");
        Subscription {
            id,
            registry: Arc::downgrade(this),
        }
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.lock();
        let Some(pos) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let entry = entries.remove(pos);
        entry.active.store(false, Ordering::SeqCst);

        debug!(%id, "listener unsubscribed");
        true
    }

    pub(super) fn ever_subscribed(&self) -> bool {
        self.ever_subscribed.load(Ordering::SeqCst)
    }

    pub(super) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Notify every listener registered at the start of the pass, skipping
    /// any that get unsubscribed before their turn
    pub(super) fn notify_all(&self, state: AppState) {
        let snapshot: Vec<Arc<Registration>> = self.lock().clone();

        for entry in snapshot {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(e) = entry.invoke(state) {
                error!(error = %e, "listener failed during delivery");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Registration>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle returned by subscribe; the only way to stop notifications.
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the listener. Safe to call from inside its own callback.
    /// Returns false if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
