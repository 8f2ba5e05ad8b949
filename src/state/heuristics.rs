use tracing::debug;

use super::{AppState, ProcessDescriptor, Snapshot};

/// Engine for inferring app state from a task/process snapshot
pub struct StateInferenceEngine;

impl StateInferenceEngine {
    /// Classify a snapshot. Pure: the result depends only on the snapshot.
    ///
    /// Task ownership is the existence signal; process importance only
    /// decides between foreground and background once a task is found.
    pub fn infer(snapshot: &Snapshot) -> AppState {
        let owner = snapshot.self_owner_id.as_str();

        let tasks = match snapshot.tasks.as_deref() {
            Some(tasks) if !tasks.is_empty() => tasks,
            _ => {
                debug!(owner, "no tasks in snapshot");
                return AppState::Terminated;
            }
        };

        if !tasks.iter().any(|task| task.is_owned_by(owner)) {
            debug!(owner, tasks = tasks.len(), "no task owned by app");
            return AppState::Terminated;
        }

        let state = Self::from_processes(owner, snapshot.processes.as_deref());
        debug!(owner, %state, "inferred from processes");
        state
    }

    /// An owned task exists; an absent or empty process list still means background
    fn from_processes(owner: &str, processes: Option<&[ProcessDescriptor]>) -> AppState {
        let in_foreground = processes
            .unwrap_or_default()
            .iter()
            .any(|process| process.is_foreground_for(owner));

        if in_foreground {
            AppState::Foreground
        } else {
            AppState::Background
        }
    }
}
