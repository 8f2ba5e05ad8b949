//! Application state inference.
//!
//! [`StateInferenceEngine`] classifies a task/process [`Snapshot`] as
//! foreground, background or terminated. [`StateChangeObservable`] re-runs
//! that inference on every recognized lifecycle [`Trigger`] and notifies
//! subscribed listeners.

pub mod observer;
pub mod state;
pub mod store;
pub mod trigger;
mod unwind;

pub use observer::{
    trigger_channel, AppStateChangeListener, DeliveryPolicy, ObservationState, ObserverConfig,
    StateChangeObservable, Subscription,
};
pub use state::{
    AppState, AppStateReader, ProcessDescriptor, ProcessImportance, Snapshot, SnapshotError,
    SnapshotProvider, StateInferenceEngine, TaskDescriptor,
};
pub use trigger::Trigger;
