mod heuristics;
mod provider;

pub use heuristics::StateInferenceEngine;
pub use provider::{
    AppStateReader, FixtureProvider, SnapshotError, SnapshotProvider, StaticProvider,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Liveness of an application instance.
///
/// Variants are declared least-alive first, so the derived ordering reads
/// `Terminated < Background < Foreground`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AppState {
    /// No evidence that the app exists
    #[default]
    Terminated,
    /// The app owns a task but no foreground-level process
    Background,
    /// The app owns a task and a foreground-level process
    Foreground,
}

impl AppState {
    pub const ALL: [AppState; 3] = [AppState::Foreground, AppState::Background, AppState::Terminated];

    /// Stable serialization tag
    pub fn as_str(self) -> &'static str {
        match self {
            AppState::Foreground => "Foreground",
            AppState::Background => "Background",
            AppState::Terminated => "Terminated",
        }
    }

    /// Parse a tag. Unrecognized tags yield `Terminated`.
    pub fn from_tag(tag: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == tag)
            .unwrap_or(AppState::Terminated)
    }

    /// True for `Foreground` and `Background`
    pub fn is_running(self) -> bool {
        !matches!(self, AppState::Terminated)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for AppState {
    fn from(tag: &str) -> Self {
        Self::from_tag(tag)
    }
}

impl Serialize for AppState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AppState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

/// Importance category the platform assigns to a running process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessImportance {
    Foreground,
    ForegroundService,
    Visible,
    Perceptible,
    Service,
    TopSleeping,
    CantSaveState,
    Cached,
    Gone,
    Other(i32),
}

impl ProcessImportance {
    /// Map the platform's numeric importance code
    pub fn from_code(code: i32) -> Self {
        match code {
            100 => ProcessImportance::Foreground,
            125 => ProcessImportance::ForegroundService,
            200 => ProcessImportance::Visible,
            230 => ProcessImportance::Perceptible,
            300 => ProcessImportance::Service,
            325 => ProcessImportance::TopSleeping,
            350 => ProcessImportance::CantSaveState,
            400 => ProcessImportance::Cached,
            1000 => ProcessImportance::Gone,
            other => ProcessImportance::Other(other),
        }
    }

    /// Only the foreground-most category counts; every other level is "not foreground"
    pub fn is_foreground(self) -> bool {
        matches!(self, ProcessImportance::Foreground)
    }
}

/// One entry of the platform's recent/running task list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Package/bundle id of the component that owns the task's root
    #[serde(default)]
    pub base_component_owner_id: Option<String>,
}

impl TaskDescriptor {
    pub fn owned_by(owner: impl Into<String>) -> Self {
        Self {
            base_component_owner_id: Some(owner.into()),
        }
    }

    /// A task whose base component could not be resolved
    pub fn unowned() -> Self {
        Self {
            base_component_owner_id: None,
        }
    }

    fn is_owned_by(&self, owner: &str) -> bool {
        self.base_component_owner_id.as_deref() == Some(owner)
    }
}

/// One running process entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    /// Process name, which for the app's main process is its package id
    pub owner_id: String,
    pub importance: ProcessImportance,
}

impl ProcessDescriptor {
    pub fn new(owner_id: impl Into<String>, importance: ProcessImportance) -> Self {
        Self {
            owner_id: owner_id.into(),
            importance,
        }
    }

    fn is_foreground_for(&self, owner: &str) -> bool {
        self.importance.is_foreground() && self.owner_id == owner
    }
}

/// Evidence gathered for a single inference pass.
///
/// `None` lists mean the platform handed back an absent list, which is
/// distinct from a failed enumeration (that never produces a snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Identifier of the application being inspected
    pub self_owner_id: String,
    #[serde(default)]
    pub tasks: Option<Vec<TaskDescriptor>>,
    #[serde(default)]
    pub processes: Option<Vec<ProcessDescriptor>>,
}

impl Snapshot {
    pub fn new(
        self_owner_id: impl Into<String>,
        tasks: Vec<TaskDescriptor>,
        processes: Vec<ProcessDescriptor>,
    ) -> Self {
        Self {
            self_owner_id: self_owner_id.into(),
            tasks: Some(tasks),
            processes: Some(processes),
        }
    }

    /// Capture a fresh snapshot from a provider
    pub fn capture<P: SnapshotProvider + ?Sized>(
        provider: &P,
        self_owner_id: &str,
    ) -> Result<Self, SnapshotError> {
        provider.snapshot(self_owner_id)
    }
}
