//! Per-session task files with a high-watermark id counter
//!
//! Disk layout: `sessions/{session_id}/tasks/{id}.json`, one file per task,
//! plus two bookkeeping files:
//!
//! - `.highwatermark` — ASCII decimal of the highest id issued so far
//!   (initially `0`). Ids are strictly increasing and never reused, even
//!   across deletes.
//! - `.lock` — sentinel claimed with an exclusive advisory lock for the
//!   lifetime of the store, marking the directory as owned by a live
//!   session.

use crate::schema::{Task, TaskStatus, TaskUpdate};
use crate::store::error::StoreError;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Outcome of [`TaskStore::update_task`] for an existing id.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdateOutcome {
    /// The merged record as persisted.
    Updated(Task),
    /// The update set `status = deleted`; the file was purged and this is
    /// the final in-memory state of the record.
    Deleted(Task),
}

impl TaskUpdateOutcome {
    pub fn task(&self) -> &Task {
        match self {
            TaskUpdateOutcome::Updated(t) | TaskUpdateOutcome::Deleted(t) => t,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, TaskUpdateOutcome::Deleted(_))
    }
}

/// Manages per-task JSON files for a session.
///
/// All operations hold the single session-wide mutex, so task mutations are
/// serial within a session and id allocation is strictly monotonic across
/// all callers.
pub struct TaskStore {
    session_id: String,
    task_dir: PathBuf,
    hwm_path: PathBuf,
    mutex: Mutex<()>,
    /// Holds the exclusive claim on `.lock` for the store's lifetime.
    _claim: fs::File,
}

impl TaskStore {
    /// Create (or reopen) the task directory for a session.
    ///
    /// Initializes `.highwatermark` to `0` on first use and claims `.lock`.
    pub fn new(
        base_dir: impl AsRef<Path>,
        session_id: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let session_id = session_id.into();
        let task_dir = base_dir
            .as_ref()
            .join("sessions")
            .join(&session_id)
            .join("tasks");
        fs::create_dir_all(&task_dir).map_err(|e| StoreError::io(&task_dir, e))?;

        let hwm_path = task_dir.join(".highwatermark");
        if !hwm_path.exists() {
            fs::write(&hwm_path, "0").map_err(|e| StoreError::io(&hwm_path, e))?;
        }

        let lock_path = task_dir.join(".lock");
        let claim = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;
        claim.try_lock_exclusive().map_err(|e| StoreError::Claim {
            path: lock_path.clone(),
            source: e,
        })?;

        Ok(Self {
            session_id,
            task_dir,
            hwm_path,
            mutex: Mutex::new(()),
            _claim: claim,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.task_dir.join(format!("{task_id}.json"))
    }

    fn next_id(&self) -> Result<String, StoreError> {
        let raw = fs::read_to_string(&self.hwm_path).map_err(|e| StoreError::io(&self.hwm_path, e))?;
        let current: u64 = raw.trim().parse().map_err(|_| StoreError::Corrupt {
            path: self.hwm_path.clone(),
            message: format!("high-watermark is not a number: {raw:?}"),
        })?;
        let next = current + 1;
        fs::write(&self.hwm_path, next.to_string())
            .map_err(|e| StoreError::io(&self.hwm_path, e))?;
        Ok(next.to_string())
    }

    fn read_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::json(&path, e))
    }

    fn write_task(&self, task: &Task) -> Result<(), StoreError> {
        let path = self.task_path(&task.id);
        let content = serde_json::to_vec_pretty(task).map_err(|e| StoreError::json(&path, e))?;
        fs::write(&path, content).map_err(|e| StoreError::io(&path, e))
    }

    /// Create a new pending task and return the persisted record.
    pub async fn create_task(
        &self,
        subject: impl Into<String>,
        description: impl Into<String>,
        owner: Option<String>,
        active_form: Option<String>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<Task, StoreError> {
        let _guard = self.mutex.lock().await;
        let id = self.next_id()?;
        let task = Task {
            id,
            subject: subject.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            owner,
            blocked_by: Vec::new(),
            blocks: Vec::new(),
            active_form,
            metadata: metadata.unwrap_or_default(),
            unknown_fields: HashMap::new(),
        };
        self.write_task(&task)?;
        debug!(session = %self.session_id, task = %task.id, "task created");
        Ok(task)
    }

    /// Apply a merge patch to a task.
    ///
    /// Returns `None` when the id does not exist. When the patch sets
    /// `status = deleted` the file is purged and the last in-memory state
    /// is handed back tagged as [`TaskUpdateOutcome::Deleted`].
    pub async fn update_task(
        &self,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<Option<TaskUpdateOutcome>, StoreError> {
        let _guard = self.mutex.lock().await;
        let Some(mut task) = self.read_task(task_id)? else {
            return Ok(None);
        };

        if let Some(subject) = update.subject {
            task.subject = subject;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(owner) = update.owner {
            task.owner = Some(owner);
        }
        if let Some(active_form) = update.active_form {
            task.active_form = Some(active_form);
        }
        if let Some(add) = update.add_blocked_by {
            union_into(&mut task.blocked_by, add);
        }
        if let Some(add) = update.add_blocks {
            union_into(&mut task.blocks, add);
        }
        if let Some(patch) = update.metadata {
            for (key, value) in patch {
                if value.is_null() {
                    task.metadata.remove(&key);
                } else {
                    task.metadata.insert(key, value);
                }
            }
        }

        if task.status == TaskStatus::Deleted {
            let path = self.task_path(task_id);
            if path.exists() {
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            }
            debug!(session = %self.session_id, task = task_id, "task deleted");
            return Ok(Some(TaskUpdateOutcome::Deleted(task)));
        }

        self.write_task(&task)?;
        Ok(Some(TaskUpdateOutcome::Updated(task)))
    }

    /// Fetch a single task by id.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let _guard = self.mutex.lock().await;
        self.read_task(task_id)
    }

    /// List all tasks, sorted numerically by id.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let _guard = self.mutex.lock().await;
        let entries = fs::read_dir(&self.task_dir).map_err(|e| StoreError::io(&self.task_dir, e))?;
        let mut tasks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.task_dir, e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
            let task: Task =
                serde_json::from_str(&content).map_err(|e| StoreError::json(&path, e))?;
            tasks.push(task);
        }
        tasks.sort_by_key(|t| t.id.parse::<u64>().unwrap_or(u64::MAX));
        Ok(tasks)
    }

    /// Remove a task file outright. Returns whether it existed.
    pub async fn delete_task(&self, task_id: &str) -> Result<bool, StoreError> {
        let _guard = self.mutex.lock().await;
        let path = self.task_path(task_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove the task directory for this session.
    pub fn cleanup(&self) -> Result<(), StoreError> {
        if self.task_dir.exists() {
            fs::remove_dir_all(&self.task_dir).map_err(|e| StoreError::io(&self.task_dir, e))?;
        }
        Ok(())
    }
}

/// Union `add` into `set`, preserving order and dropping duplicates.
fn union_into(set: &mut Vec<String>, add: Vec<String>) {
    for item in add {
        if !set.contains(&item) {
            set.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> TaskStore {
        TaskStore::new(dir.path(), "test-session").unwrap()
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let a = store.create_task("a", "", None, None, None).await.unwrap();
        let b = store.create_task("b", "", None, None, None).await.unwrap();
        assert_eq!(a.id, "1");
        assert_eq!(b.id, "2");
        assert_eq!(a.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_ids_never_reused_after_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let a = store.create_task("a", "", None, None, None).await.unwrap();
        assert!(store.delete_task(&a.id).await.unwrap());
        let b = store.create_task("b", "", None, None, None).await.unwrap();
        assert_eq!(b.id, "2");
    }

    #[tokio::test]
    async fn test_highwatermark_file_contents() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let hwm = dir.path().join("sessions/test-session/tasks/.highwatermark");
        assert_eq!(std::fs::read_to_string(&hwm).unwrap().trim(), "0");
        store.create_task("a", "", None, None, None).await.unwrap();
        assert_eq!(std::fs::read_to_string(&hwm).unwrap().trim(), "1");
        assert!(dir.path().join("sessions/test-session/tasks/.lock").exists());
    }

    #[tokio::test]
    async fn test_update_overwrites_plain_fields() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let t = store.create_task("a", "old", None, None, None).await.unwrap();

        let outcome = store
            .update_task(
                &t.id,
                TaskUpdate {
                    description: Some("new".into()),
                    status: Some(TaskStatus::InProgress),
                    owner: Some("worker".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        let task = outcome.task();
        assert_eq!(task.description, "new");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.owner.as_deref(), Some("worker"));

        // Persisted too.
        let reread = store.get_task(&t.id).await.unwrap().unwrap();
        assert_eq!(reread.owner.as_deref(), Some("worker"));
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let outcome = store.update_task("99", TaskUpdate::default()).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_blocked_by_union_deduplicates() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let t = store.create_task("a", "", None, None, None).await.unwrap();
        store
            .update_task(
                &t.id,
                TaskUpdate {
                    add_blocked_by: Some(vec!["2".into(), "3".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let outcome = store
            .update_task(
                &t.id,
                TaskUpdate {
                    add_blocked_by: Some(vec!["3".into(), "4".into()]),
                    add_blocks: Some(vec!["5".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.task().blocked_by, vec!["2", "3", "4"]);
        assert_eq!(outcome.task().blocks, vec!["5"]);
    }

    #[tokio::test]
    async fn test_metadata_merge_with_null_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let mut meta = HashMap::new();
        meta.insert("priority".to_string(), serde_json::json!("high"));
        meta.insert("source".to_string(), serde_json::json!("user"));
        let t = store
            .create_task("a", "", None, None, Some(meta))
            .await
            .unwrap();

        let mut patch = HashMap::new();
        patch.insert("priority".to_string(), serde_json::json!("low"));
        patch.insert("source".to_string(), serde_json::Value::Null);
        patch.insert("tag".to_string(), serde_json::json!("v2"));

        let outcome = store
            .update_task(
                &t.id,
                TaskUpdate {
                    metadata: Some(patch),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        let meta = &outcome.task().metadata;
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get("priority").unwrap(), "low");
        assert_eq!(meta.get("tag").unwrap(), "v2");
        assert!(!meta.contains_key("source"));
    }

    #[tokio::test]
    async fn test_deleted_status_purges_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let t = store.create_task("a", "", None, None, None).await.unwrap();
        let path = dir
            .path()
            .join(format!("sessions/test-session/tasks/{}.json", t.id));
        assert!(path.exists());

        let outcome = store
            .update_task(
                &t.id,
                TaskUpdate {
                    status: Some(TaskStatus::Deleted),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.is_deleted());
        assert_eq!(outcome.task().status, TaskStatus::Deleted);
        assert!(!path.exists());
        assert!(store.list_tasks().await.unwrap().is_empty());
        assert!(store.get_task(&t.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sorts_numerically() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        for i in 0..12 {
            store
                .create_task(format!("t{i}"), "", None, None, None)
                .await
                .unwrap();
        }
        let tasks = store.list_tasks().await.unwrap();
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        // Numeric order, not lexicographic ("10" must come after "9").
        assert_eq!(
            ids,
            vec!["1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12"]
        );
    }

    #[tokio::test]
    async fn test_reopen_continues_id_sequence() {
        let dir = TempDir::new().unwrap();
        {
            let store = TaskStore::new(dir.path(), "s").unwrap();
            store.create_task("a", "", None, None, None).await.unwrap();
        }
        let store = TaskStore::new(dir.path(), "s").unwrap();
        let t = store.create_task("b", "", None, None, None).await.unwrap();
        assert_eq!(t.id, "2");
    }
}
