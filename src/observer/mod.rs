//! Lifecycle-driven state observation.
//!
//! Every recognized [`Trigger`] captures a fresh snapshot, runs the
//! inference engine and hands the result to each registered listener in
//! registration order.
//!
//! ## Delivery guarantees
//!
//! Delivery is single-threaded: a pass runs entirely on the thread that
//! called [`StateChangeObservable::handle_trigger`] (or on the task driving
//! [`StateChangeObservable::run`]). Triggers that arrive while a pass is in
//! progress, including ones fired from inside a listener, are queued and
//! delivered by that same thread once the current pass finishes, so no
//! listener ever runs concurrently with itself. No lock is held while a
//! listener runs.

mod registry;

pub use registry::{AppStateChangeListener, ListenerError, Subscription, SubscriptionId};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::state::{AppState, AppStateReader, SnapshotProvider};
use crate::trigger::Trigger;
use registry::ListenerRegistry;

pub type TriggerSender = mpsc::UnboundedSender<Trigger>;
pub type TriggerReceiver = mpsc::UnboundedReceiver<Trigger>;

/// Channel an external lifecycle source feeds into [`StateChangeObservable::run`]
pub fn trigger_channel() -> (TriggerSender, TriggerReceiver) {
    mpsc::unbounded_channel()
}

/// When a delivery pass notifies listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Notify on every recognized trigger, even if the state did not change
    #[default]
    EveryTrigger,
    /// Skip passes whose state equals the last delivered one
    ChangesOnly,
}

/// Configuration for an observable
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Identifier of the application being observed
    pub self_owner_id: String,
    pub policy: DeliveryPolicy,
}

impl ObserverConfig {
    pub fn new(self_owner_id: impl Into<String>) -> Self {
        Self {
            self_owner_id: self_owner_id.into(),
            policy: DeliveryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Observation lifecycle of an observable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationState {
    /// Nobody has subscribed yet; triggers are dropped
    Unobserved,
    /// At least one subscribe happened; stays here for good
    Observing,
}

#[derive(Default)]
struct Dispatch {
    queue: VecDeque<Trigger>,
    delivering: bool,
    last_delivered: Option<AppState>,
}

/// Releases the deliverer role if a drain loop unwinds, so later triggers
/// are not queued forever
struct DrainGuard<'a> {
    dispatch: &'a Mutex<Dispatch>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut dispatch = self.dispatch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            dispatch.delivering = false;
        }
    }
}

/// Re-evaluates app state on lifecycle triggers and notifies listeners
pub struct StateChangeObservable<P> {
    reader: AppStateReader<P>,
    policy: DeliveryPolicy,
    registry: Arc<ListenerRegistry>,
    dispatch: Mutex<Dispatch>,
}

impl<P: SnapshotProvider> StateChangeObservable<P> {
    pub fn new(provider: P, config: ObserverConfig) -> Self {
        Self {
            reader: AppStateReader::new(provider, config.self_owner_id),
            policy: config.policy,
            registry: Arc::new(ListenerRegistry::default()),
            dispatch: Mutex::new(Dispatch::default()),
        }
    }

    /// Register a listener. Listeners are notified in registration order.
    pub fn subscribe<L>(&self, listener: L) -> Subscription
    where
        L: AppStateChangeListener + 'static,
    {
        ListenerRegistry::add(&self.registry, Arc::new(listener))
    }

    /// Register a closure as a listener
    pub fn subscribe_fn<F>(&self, f: F) -> Subscription
    where
        F: Fn(AppState) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(f)
    }

    pub fn observation_state(&self) -> ObservationState {
        if self.registry.ever_subscribed() {
            ObservationState::Observing
        } else {
            ObservationState::Unobserved
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Synchronous, on-demand inference without notifying anyone
    pub fn current_state(&self) -> AppState {
        self.reader.current_state()
    }

    /// React to one lifecycle trigger.
    ///
    /// If a pass is already running (on this or another thread) the trigger
    /// is queued for the running pass's thread and this call returns at once.
    pub fn handle_trigger(&self, trigger: Trigger) {
        if !trigger.is_recognized() {
            trace!(?trigger, "ignoring trigger");
            return;
        }
        if self.observation_state() == ObservationState::Unobserved {
            trace!(?trigger, "no subscribers yet, dropping trigger");
            return;
        }

        {
            let mut dispatch = self.lock_dispatch();
            dispatch.queue.push_back(trigger);
            if dispatch.delivering {
                debug!(?trigger, queued = dispatch.queue.len(), "pass in progress, trigger queued");
                return;
            }
            dispatch.delivering = true;
        }

        let _unwind = DrainGuard { dispatch: &self.dispatch };
        loop {
            let next = {
                let mut dispatch = self.lock_dispatch();
                match dispatch.queue.pop_front() {
                    Some(trigger) => trigger,
                    None => {
                        dispatch.delivering = false;
                        break;
                    }
                }
            };
            self.deliver(next);
        }
    }

    /// Drain a trigger channel until every sender is dropped
    pub async fn run(&self, mut triggers: TriggerReceiver) {
        while let Some(trigger) = triggers.recv().await {
            self.handle_trigger(trigger);
        }
        debug!("trigger source closed");
    }

    fn deliver(&self, trigger: Trigger) {
        let state = self.reader.current_state();

        if self.policy == DeliveryPolicy::ChangesOnly {
            let mut dispatch = self.lock_dispatch();
            if dispatch.last_delivered == Some(state) {
                debug!(?trigger, %state, "state unchanged, skipping pass");
                return;
            }
            dispatch.last_delivered = Some(state);
        }

        debug!(?trigger, %state, listeners = self.registry.len(), "delivering state");
        self.registry.notify_all(state);
    }

    fn lock_dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
