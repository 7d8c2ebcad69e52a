//! Per-agent inbox files with read/unread semantics
//!
//! Disk layout: `sessions/{session_id}/inboxes/{agent_name}.json`, each
//! file a JSON array of [`Message`] objects in append order. The directory
//! is created lazily on the first write — read-only calls on a fresh
//! session never touch the filesystem.

use crate::schema::Message;
use crate::store::error::StoreError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::debug;

/// Manages per-agent inbox JSON files for a session.
///
/// Every operation on an agent's inbox holds that agent's mutex for the
/// whole read-modify-write cycle, so `read_unread` observes and flips the
/// unread flags atomically with respect to concurrent appends.
pub struct InboxStore {
    session_id: String,
    inbox_dir: PathBuf,
    /// Per-agent mutexes, created on first reference and retained for the
    /// lifetime of the store.
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InboxStore {
    /// Create a store rooted at `<base_dir>/sessions/<session_id>/inboxes`.
    ///
    /// Nothing is written until the first append.
    pub fn new(base_dir: impl AsRef<Path>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let inbox_dir = base_dir
            .as_ref()
            .join("sessions")
            .join(&session_id)
            .join("inboxes");
        Self {
            session_id,
            inbox_dir,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn agent_lock(&self, agent: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("inbox lock map poisoned");
        Arc::clone(
            locks
                .entry(agent.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn inbox_path(&self, agent: &str) -> PathBuf {
        self.inbox_dir.join(format!("{agent}.json"))
    }

    fn read_raw(&self, agent: &str) -> Result<Vec<Message>, StoreError> {
        if !self.inbox_dir.exists() {
            return Ok(Vec::new());
        }
        let path = self.inbox_path(agent);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_str(&content).map_err(|e| StoreError::json(&path, e))
    }

    fn write_raw(&self, agent: &str, messages: &[Message]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.inbox_dir).map_err(|e| StoreError::io(&self.inbox_dir, e))?;
        let path = self.inbox_path(agent);
        let content =
            serde_json::to_vec_pretty(messages).map_err(|e| StoreError::json(&path, e))?;
        fs::write(&path, content).map_err(|e| StoreError::io(&path, e))
    }

    /// Append a message to an agent's inbox, creating the directory on the
    /// first write.
    pub async fn append(&self, agent: &str, message: Message) -> Result<(), StoreError> {
        let lock = self.agent_lock(agent);
        let _guard = lock.lock().await;
        let mut messages = self.read_raw(agent)?;
        messages.push(message);
        self.write_raw(agent, &messages)?;
        debug!(
            session = %self.session_id,
            agent,
            total = messages.len(),
            "inbox append"
        );
        Ok(())
    }

    /// Read all messages for an agent. Empty when no inbox exists yet.
    pub async fn read_all(&self, agent: &str) -> Result<Vec<Message>, StoreError> {
        let lock = self.agent_lock(agent);
        let _guard = lock.lock().await;
        self.read_raw(agent)
    }

    /// Read unread messages (in append order) and mark the whole inbox read.
    ///
    /// Idempotent: a second call without intervening appends returns an
    /// empty list.
    pub async fn read_unread(&self, agent: &str) -> Result<Vec<Message>, StoreError> {
        let lock = self.agent_lock(agent);
        let _guard = lock.lock().await;
        let mut messages = self.read_raw(agent)?;
        let unread: Vec<Message> = messages.iter().filter(|m| !m.read).cloned().collect();
        if !unread.is_empty() {
            for m in &mut messages {
                m.read = true;
            }
            self.write_raw(agent, &messages)?;
        }
        Ok(unread)
    }

    /// Mark messages as read. `indices` limits the operation to those
    /// positions; `None` marks everything. Returns how many flags flipped.
    pub async fn mark_read(
        &self,
        agent: &str,
        indices: Option<&[usize]>,
    ) -> Result<usize, StoreError> {
        let lock = self.agent_lock(agent);
        let _guard = lock.lock().await;
        let mut messages = self.read_raw(agent)?;
        let mut count = 0;
        for (i, m) in messages.iter_mut().enumerate() {
            let selected = indices.is_none_or(|idx| idx.contains(&i));
            if selected && !m.read {
                m.read = true;
                count += 1;
            }
        }
        if count > 0 {
            self.write_raw(agent, &messages)?;
        }
        Ok(count)
    }

    /// Drop all messages for an agent, leaving an empty inbox file.
    pub async fn clear(&self, agent: &str) -> Result<(), StoreError> {
        let lock = self.agent_lock(agent);
        let _guard = lock.lock().await;
        self.write_raw(agent, &[])
    }

    /// Remove the entire session directory (inboxes and tasks alike).
    pub fn cleanup(&self) -> Result<(), StoreError> {
        let session_dir = self
            .inbox_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.inbox_dir.clone());
        if session_dir.exists() {
            fs::remove_dir_all(&session_dir).map_err(|e| StoreError::io(&session_dir, e))?;
        }
        Ok(())
    }
}
