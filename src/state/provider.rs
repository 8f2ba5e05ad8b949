use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use super::heuristics::StateInferenceEngine;
use super::{AppState, ProcessDescriptor, Snapshot, TaskDescriptor};
use crate::unwind;

/// Failure to obtain a snapshot from the platform
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("platform service unavailable: {0}")]
    Unavailable(String),

    #[error("failed to enumerate {what}: {reason}")]
    EnumerationFailed { what: &'static str, reason: String },

    #[error("failed to read snapshot fixture {path}")]
    FixtureIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot fixture {path}")]
    FixtureJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of task and process lists.
///
/// `Ok(None)` means the platform returned no list at all; `Err` means the
/// enumeration itself failed.
pub trait SnapshotProvider: Send + Sync {
    fn tasks(&self) -> Result<Option<Vec<TaskDescriptor>>, SnapshotError>;

    fn processes(&self) -> Result<Option<Vec<ProcessDescriptor>>, SnapshotError>;

    /// Gather the evidence for one inference pass.
    ///
    /// Processes are only enumerated once a task owned by `self_owner_id`
    /// is found; without one the state is terminated regardless.
    fn snapshot(&self, self_owner_id: &str) -> Result<Snapshot, SnapshotError> {
        let tasks = self.tasks()?;
        let owned = tasks
            .as_deref()
            .is_some_and(|tasks| tasks.iter().any(|task| task.is_owned_by(self_owner_id)));
        let processes = if owned { self.processes()? } else { None };

        Ok(Snapshot {
            self_owner_id: self_owner_id.to_string(),
            tasks,
            processes,
        })
    }
}

impl<P: SnapshotProvider + ?Sized> SnapshotProvider for Arc<P> {
    fn tasks(&self) -> Result<Option<Vec<TaskDescriptor>>, SnapshotError> {
        (**self).tasks()
    }

    fn processes(&self) -> Result<Option<Vec<ProcessDescriptor>>, SnapshotError> {
        (**self).processes()
    }

    fn snapshot(&self, self_owner_id: &str) -> Result<Snapshot, SnapshotError> {
        (**self).snapshot(self_owner_id)
    }
}

/// Provider returning fixed lists
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    pub tasks: Option<Vec<TaskDescriptor>>,
    pub processes: Option<Vec<ProcessDescriptor>>,
}

impl StaticProvider {
    pub fn new(tasks: Vec<TaskDescriptor>, processes: Vec<ProcessDescriptor>) -> Self {
        Self {
            tasks: Some(tasks),
            processes: Some(processes),
        }
    }
}

impl SnapshotProvider for StaticProvider {
    fn tasks(&self) -> Result<Option<Vec<TaskDescriptor>>, SnapshotError> {
        Ok(self.tasks.clone())
    }

    fn processes(&self) -> Result<Option<Vec<ProcessDescriptor>>, SnapshotError> {
        Ok(self.processes.clone())
    }
}

/// Provider backed by a JSON snapshot file, re-read on every call so the
/// file can change between triggers
pub struct FixtureProvider {
    path: PathBuf,
}

impl FixtureProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The application id recorded in the fixture itself
    pub fn owner_id(&self) -> Result<String, SnapshotError> {
        Ok(self.load()?.self_owner_id)
    }

    fn load(&self) -> Result<Snapshot, SnapshotError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| SnapshotError::FixtureIo {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SnapshotError::FixtureJson {
            path: self.path.clone(),
            source,
        })
    }
}

impl SnapshotProvider for FixtureProvider {
    fn tasks(&self) -> Result<Option<Vec<TaskDescriptor>>, SnapshotError> {
        Ok(self.load()?.tasks)
    }

    fn processes(&self) -> Result<Option<Vec<ProcessDescriptor>>, SnapshotError> {
        Ok(self.load()?.processes)
    }

    /// One read per pass, so tasks and processes always come from the same
    /// version of the file
    fn snapshot(&self, self_owner_id: &str) -> Result<Snapshot, SnapshotError> {
        let snapshot = self.load()?;
        Ok(Snapshot {
            self_owner_id: self_owner_id.to_string(),
            ..snapshot
        })
    }
}

/// On-demand state lookup for one application, without subscribing
pub struct AppStateReader<P> {
    provider: P,
    self_owner_id: String,
}

impl<P: SnapshotProvider> AppStateReader<P> {
    pub fn new(provider: P, self_owner_id: impl Into<String>) -> Self {
        Self {
            provider,
            self_owner_id: self_owner_id.into(),
        }
    }

    pub fn self_owner_id(&self) -> &str {
        &self.self_owner_id
    }

    /// Run one inference pass. Never fails: an unavailable snapshot, or a
    /// provider that panics, is reported as `Terminated`.
    pub fn current_state(&self) -> AppState {
        match unwind::catch(|| Snapshot::capture(&self.provider, &self.self_owner_id)) {
            Ok(Ok(snapshot)) => StateInferenceEngine::infer(&snapshot),
            Ok(Err(e)) => {
                warn!(owner = %self.self_owner_id, error = %e, "snapshot unavailable");
                AppState::Terminated
            }
            Err(message) => {
                warn!(owner = %self.self_owner_id, %message, "snapshot provider panicked");
                AppState::Terminated
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ProcessImportance;
    use std::io::Write;

    const APP: &str = "com.app.x";

    struct FailingProvider {
        fail_tasks: bool,
    }

    impl SnapshotProvider for FailingProvider {
        fn tasks(&self) -> Result<Option<Vec<TaskDescriptor>>, SnapshotError> {
            if self.fail_tasks {
                Err(SnapshotError::Unavailable("activity service".into()))
            } else {
                Ok(Some(vec![TaskDescriptor::owned_by(APP)]))
            }
        }

        fn processes(&self) -> Result<Option<Vec<ProcessDescriptor>>, SnapshotError> {
            Err(SnapshotError::EnumerationFailed {
                what: "processes",
                reason: "denied".into(),
            })
        }
    }

    #[test]
    fn test_task_failure_is_terminated() {
        let reader = AppStateReader::new(FailingProvider { fail_tasks: true }, APP);
        assert_eq!(reader.current_state(), AppState::Terminated);
    }

    #[test]
    fn test_process_failure_is_terminated() {
        let reader = AppStateReader::new(FailingProvider { fail_tasks: false }, APP);
        assert_eq!(reader.current_state(), AppState::Terminated);
    }

    #[test]
    fn test_absent_process_list_is_background() {
        let provider = StaticProvider {
            tasks: Some(vec![TaskDescriptor::owned_by(APP)]),
            processes: None,
        };
        let reader = AppStateReader::new(provider, APP);
        assert_eq!(reader.current_state(), AppState::Background);
    }

    #[test]
    fn test_static_provider_foreground() {
        let provider = StaticProvider::new(
            vec![TaskDescriptor::owned_by(APP)],
            vec![ProcessDescriptor::new(APP, ProcessImportance::Foreground)],
        );
        let reader = AppStateReader::new(Arc::new(provider), APP);
        assert_eq!(reader.current_state(), AppState::Foreground);
    }

    #[test]
    fn test_fixture_provider_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"self_owner_id": "{APP}", "tasks": [{{"base_component_owner_id": "{APP}"}}], "processes": []}}"#
        )
        .unwrap();

        let reader = AppStateReader::new(FixtureProvider::new(file.path()), APP);
        assert_eq!(reader.current_state(), AppState::Background);
    }

    #[test]
    fn test_missing_fixture_is_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FixtureProvider::new(dir.path().join("missing.json"));
        assert!(matches!(provider.tasks(), Err(SnapshotError::FixtureIo { .. })));

        let reader = AppStateReader::new(provider, APP);
        assert_eq!(reader.current_state(), AppState::Terminated);
    }

    #[test]
    fn test_malformed_fixture_is_terminated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let provider = FixtureProvider::new(file.path());
        assert!(matches!(provider.processes(), Err(SnapshotError::FixtureJson { .. })));
        assert_eq!(AppStateReader::new(provider, APP).current_state(), AppState::Terminated);
    }

    #[test]
    fn test_fixture_owner_id() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"self_owner_id": "com.app.y", "tasks": []}}"#).unwrap();

        let provider = FixtureProvider::new(file.path());
        assert_eq!(provider.owner_id().unwrap(), "com.app.y");
    }

    #[test]
    fn test_fixture_snapshot_never_mixes_versions() {
        // Owned task, no processes: background
        let v1 = format!(r#"{{"self_owner_id": "{APP}", "tasks": [{{"base_component_owner_id": "{APP}"}}], "processes": []}}"#);
        // No tasks, foreground process: terminated
        let v2 = format!(r#"{{"self_owner_id": "{APP}", "tasks": [], "processes": [{{"owner_id": "{APP}", "importance": "foreground"}}]}}"#);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let staging = dir.path().join("snapshot.json.next");
        std::fs::write(&path, &v1).unwrap();

        let reader = AppStateReader::new(FixtureProvider::new(&path), APP);
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..500 {
                    let contents = if i % 2 == 0 { &v2 } else { &v1 };
                    std::fs::write(&staging, contents).unwrap();
                    std::fs::rename(&staging, &path).unwrap();
                }
                done.store(true, std::sync::atomic::Ordering::SeqCst);
            });

            while !done.load(std::sync::atomic::Ordering::SeqCst) {
                assert_ne!(reader.current_state(), AppState::Foreground);
            }
        });
    }

    #[test]
    fn test_processes_skipped_without_owned_task() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingProvider {
            tasks: Vec<TaskDescriptor>,
            process_calls: AtomicUsize,
        }

        impl SnapshotProvider for CountingProvider {
            fn tasks(&self) -> Result<Option<Vec<TaskDescriptor>>, SnapshotError> {
                Ok(Some(self.tasks.clone()))
            }

            fn processes(&self) -> Result<Option<Vec<ProcessDescriptor>>, SnapshotError> {
                self.process_calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(vec![ProcessDescriptor::new(APP, ProcessImportance::Foreground)]))
            }
        }

        let foreign = Arc::new(CountingProvider {
            tasks: vec![TaskDescriptor::owned_by("com.other")],
            process_calls: AtomicUsize::new(0),
        });
        assert_eq!(AppStateReader::new(foreign.clone(), APP).current_state(), AppState::Terminated);
        assert_eq!(foreign.process_calls.load(Ordering::SeqCst), 0);

        let empty = Arc::new(CountingProvider {
            tasks: vec![],
            process_calls: AtomicUsize::new(0),
        });
        assert_eq!(AppStateReader::new(empty.clone(), APP).current_state(), AppState::Terminated);
        assert_eq!(empty.process_calls.load(Ordering::SeqCst), 0);

        let owned = Arc::new(CountingProvider {
            tasks: vec![TaskDescriptor::owned_by(APP)],
            process_calls: AtomicUsize::new(0),
        });
        assert_eq!(AppStateReader::new(owned.clone(), APP).current_state(), AppState::Foreground);
        assert_eq!(owned.process_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_provider_is_terminated() {
        struct PanickingProvider;

        impl SnapshotProvider for PanickingProvider {
            fn tasks(&self) -> Result<Option<Vec<TaskDescriptor>>, SnapshotError> {
                panic!("activity service crashed")
            }

            fn processes(&self) -> Result<Option<Vec<ProcessDescriptor>>, SnapshotError> {
                Ok(None)
            }
        }

        let reader = AppStateReader::new(PanickingProvider, APP);
        assert_eq!(reader.current_state(), AppState::Terminated);
    }
}
