use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::{FileObject, FileSpec, TaskKey, TaskPatch, TaskStatus, UploadTask};

/// The ordered collection of upload tasks behind one form, synchronous core.
///
/// Tasks keep their insertion order (drop/selection order) for the whole
/// lifetime of the registry; completion order across files does not reorder
/// anything.
#[derive(Debug, Default)]
pub struct RegistryInner {
    tasks: Vec<UploadTask>,
}

impl RegistryInner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one `Pending` task per spec, returning the new keys in input
    /// order.
    pub fn add_files(&mut self, specs: &[FileSpec]) -> Vec<TaskKey> {
        let mut keys = Vec::with_capacity(specs.len());
        for spec in specs {
            let task = UploadTask::pending(spec);
            keys.push(task.key);
            self.tasks.push(task);
        }
        keys
    }

    /// Seed with files that already exist on the server (edit mode). They
    /// enter as `Uploaded` with their server ids, in the order given.
    pub fn seed(&mut self, initial: &[FileObject]) -> Vec<TaskKey> {
        let mut keys = Vec::with_capacity(initial.len());
        for file in initial {
            let task = UploadTask::settled(file);
            keys.push(task.key);
            self.tasks.push(task);
        }
        keys
    }

    /// Merge a patch into the task matching `key`.
    ///
    /// Returns false without touching anything when the key is absent: a
    /// progress or completion callback can race past a concurrent removal,
    /// and such stale mutations are dropped.
    pub fn apply(&mut self, key: TaskKey, patch: TaskPatch) -> bool {
        match self.tasks.iter_mut().find(|t| t.key == key) {
            Some(task) => {
                task.apply(patch);
                true
            }
            None => {
                debug!(%key, "dropping mutation for removed task");
                false
            }
        }
    }

    /// Remove the task matching `key`. Idempotent: a second call for the
    /// same key returns `None`.
    pub fn remove(&mut self, key: TaskKey) -> Option<UploadTask> {
        let idx = self.tasks.iter().position(|t| t.key == key)?;
        Some(self.tasks.remove(idx))
    }

    pub fn get(&self, key: TaskKey) -> Option<&UploadTask> {
        self.tasks.iter().find(|t| t.key == key)
    }

    /// The current ordered task list, cloned for rendering.
    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.tasks.clone()
    }

    /// Ordered ids of tasks that finished uploading. Recomputed from scratch
    /// on every change; `pending`/`uploading`/`failed` tasks never appear.
    pub fn committed_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.is_uploaded())
            .filter_map(|t| t.id.clone())
            .collect()
    }

    pub fn all_uploaded(&self) -> bool {
        self.tasks.iter().all(|t| t.is_uploaded())
    }

    pub fn any_failed(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Failed)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Published to subscribers after every registry mutation.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub tasks: Vec<UploadTask>,
    pub committed_ids: Vec<String>,
}

struct State {
    inner: RegistryInner,
    cancel: HashMap<TaskKey, CancellationToken>,
}

/// Shared handle over the registry.
///
/// Transfer tasks patch through it from any tokio task; consumers subscribe
/// to a watch channel carrying the latest snapshot. Removal cancels the
/// task's token before deleting the entry, so a late callback for the key
/// finds nothing to update.
#[derive(Clone)]
pub struct UploadRegistry {
    state: Arc<Mutex<State>>,
    tx: watch::Sender<RegistrySnapshot>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RegistrySnapshot::default());
        Self {
            state: Arc::new(Mutex::new(State {
                inner: RegistryInner::new(),
                cancel: HashMap::new(),
            })),
            tx,
        }
    }

    /// A registry pre-populated with already-uploaded files (edit mode).
    pub fn with_initial(initial: &[FileObject]) -> Self {
        let registry = Self::new();
        {
            let mut state = registry.lock();
            state.inner.seed(initial);
        }
        registry.publish();
        registry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self) {
        let snapshot = {
            let state = self.lock();
            RegistrySnapshot {
                tasks: state.inner.snapshot(),
                committed_ids: state.inner.committed_ids(),
            }
        };
        self.tx.send_replace(snapshot);
    }

    /// Subscribe to snapshots. The receiver immediately holds the current
    /// state.
    pub fn subscribe(&self) -> watch::Receiver<RegistrySnapshot> {
        self.tx.subscribe()
    }

    pub fn add_files(&self, specs: &[FileSpec]) -> Vec<TaskKey> {
        let keys = {
            let mut state = self.lock();
            let keys = state.inner.add_files(specs);
            for key in &keys {
                state.cancel.insert(*key, CancellationToken::new());
            }
            keys
        };
        self.publish();
        keys
    }

    /// Merge a patch; stale keys are dropped (returns false).
    pub fn apply(&self, key: TaskKey, patch: TaskPatch) -> bool {
        let applied = self.lock().inner.apply(key, patch);
        if applied {
            self.publish();
        }
        applied
    }

    /// Remove a task, cancelling its in-flight transfer first.
    pub fn remove(&self, key: TaskKey) -> Option<UploadTask> {
        let removed = {
            let mut state = self.lock();
            if let Some(token) = state.cancel.remove(&key) {
                token.cancel();
            }
            state.inner.remove(key)
        };
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Cancellation token for a task, if it is still registered.
    pub fn cancellation(&self, key: TaskKey) -> Option<CancellationToken> {
        self.lock().cancel.get(&key).cloned()
    }

    pub fn get(&self, key: TaskKey) -> Option<UploadTask> {
        self.lock().inner.get(key).cloned()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.lock();
        RegistrySnapshot {
            tasks: state.inner.snapshot(),
            committed_ids: state.inner.committed_ids(),
        }
    }
}

impl Default for UploadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> FileSpec {
        FileSpec {
            name: name.to_string(),
            size: 10,
            mime_type: "application/octet-stream".to_string(),
        }
    }

    #[test]
    fn test_add_files_preserves_input_order_across_calls() {
        let mut reg = RegistryInner::new();
        reg.add_files(&[spec("a"), spec("b")]);
        reg.add_files(&[spec("c")]);
        reg.add_files(&[spec("d"), spec("e")]);

        let names: Vec<_> = reg.snapshot().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_committed_ids_are_uploaded_subsequence() {
        let mut reg = RegistryInner::new();
        let keys = reg.add_files(&[spec("a"), spec("b"), spec("c"), spec("d")]);

        reg.apply(
            keys[0],
            TaskPatch {
                status: Some(TaskStatus::Uploaded),
                id: Some("id-a".to_string()),
                ..Default::default()
            },
        );
        reg.apply(keys[1], TaskPatch::status(TaskStatus::Uploading));
        reg.apply(keys[2], TaskPatch::failed("quota exceeded"));
        reg.apply(
            keys[3],
            TaskPatch {
                status: Some(TaskStatus::Uploaded),
                id: Some("id-d".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(reg.committed_ids(), vec!["id-a", "id-d"]);
    }

    #[test]
    fn test_out_of_order_completion_keeps_insertion_order() {
        let mut reg = RegistryInner::new();
        let keys = reg.add_files(&[spec("first"), spec("second")]);

        // second finishes before first
        reg.apply(
            keys[1],
            TaskPatch {
                status: Some(TaskStatus::Uploaded),
                id: Some("id-2".to_string()),
                ..Default::default()
            },
        );
        reg.apply(
            keys[0],
            TaskPatch {
                status: Some(TaskStatus::Uploaded),
                id: Some("id-1".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(reg.committed_ids(), vec!["id-1", "id-2"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut reg = RegistryInner::new();
        let keys = reg.add_files(&[spec("a"), spec("b")]);

        assert!(reg.remove(keys[0]).is_some());
        assert!(reg.remove(keys[0]).is_none());
        assert_eq!(reg.snapshot().len(), 1);
    }

    #[test]
    fn test_stale_apply_is_dropped() {
        let mut reg = RegistryInner::new();
        let keys = reg.add_files(&[spec("a")]);
        reg.remove(keys[0]);

        let applied = reg.apply(
            keys[0],
            TaskPatch {
                status: Some(TaskStatus::Uploaded),
                id: Some("ghost".to_string()),
                ..Default::default()
            },
        );

        assert!(!applied);
        assert!(reg.snapshot().is_empty());
        assert!(reg.committed_ids().is_empty());
    }

    #[test]
    fn test_seed_enters_as_uploaded() {
        use chrono::Utc;

        let file = FileObject {
            id: "existing".to_string(),
            organization_id: "org".to_string(),
            name: "old.zip".to_string(),
            mime_type: "application/zip".to_string(),
            size: 42,
            service: crate::model::ServiceCategory::Downloadable,
            checksum_sha256: None,
            is_uploaded: true,
            created_at: Utc::now(),
        };

        let mut reg = RegistryInner::new();
        reg.seed(std::slice::from_ref(&file));

        assert_eq!(reg.committed_ids(), vec!["existing"]);
        assert!(reg.all_uploaded());
    }

    #[test]
    fn test_handle_remove_cancels_token() {
        let reg = UploadRegistry::new();
        let keys = reg.add_files(&[spec("a")]);
        let token = reg.cancellation(keys[0]).unwrap();

        assert!(!token.is_cancelled());
        reg.remove(keys[0]);
        assert!(token.is_cancelled());
        assert!(reg.cancellation(keys[0]).is_none());
    }

    #[test]
    fn test_handle_publishes_snapshots() {
        let reg = UploadRegistry::new();
        let rx = reg.subscribe();

        let keys = reg.add_files(&[spec("a")]);
        assert_eq!(rx.borrow().tasks.len(), 1);

        reg.apply(
            keys[0],
            TaskPatch {
                status: Some(TaskStatus::Uploaded),
                id: Some("id-a".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(rx.borrow().committed_ids, vec!["id-a"]);

        reg.remove(keys[0]);
        assert!(rx.borrow().tasks.is_empty());
    }
}
