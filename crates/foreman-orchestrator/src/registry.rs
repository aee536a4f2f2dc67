use chrono::{DateTime, Utc};
use foreman_core::{ExecutionHandle, ExecutionStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Binding between a Registry entry and the Ledger Task it works.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    /// Epic id.
    pub epic: String,
    /// Epic-scoped Task id, e.g. `1.2`.
    pub task: String,
}

/// Tracking record for one outstanding asynchronous dispatch.
///
/// The ephemeral bridge between an execution handle and its eventual Task
/// outcome. The retained `payload` is what the Supervisor re-dispatches on
/// retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Entry identifier; equals the execution handle id.
    pub id: Uuid,
    /// Catalog name of the dispatched agent.
    pub agent: String,
    /// The fully assembled payload, retained for retries.
    pub payload: String,
    /// Ledger Task this entry works, if bound.
    #[serde(default)]
    pub task_ref: Option<TaskRef>,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// UTC timestamp of the current attempt's start.
    pub started_at: DateTime<Utc>,
    /// UTC timestamp of the last liveness signal.
    pub last_heartbeat: DateTime<Utc>,
    /// Number of stale-triggered retries so far.
    pub retries: u32,
    /// Latest progress note from a heartbeat.
    #[serde(default)]
    pub note: Option<String>,
    /// Result payload once completed.
    #[serde(default)]
    pub result: Option<String>,
    /// Error payload once failed.
    #[serde(default)]
    pub error: Option<String>,
    /// UTC timestamp of reaching a terminal status.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RegistryEntry {
    /// Elapsed time since the last liveness signal.
    pub fn since_heartbeat(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or_default()
    }
}

/// In-memory index of outstanding asynchronous dispatches.
///
/// Entries here are the single source of truth for "is this async work
/// still alive"; nothing else may infer liveness. Terminal transitions
/// are exactly-once: repeated `complete`/`fail` calls are logged no-ops,
/// since network retries can duplicate the final update and late results
/// of abandoned work must be ignored, not applied.
pub struct TaskRegistry {
    entries: Arc<RwLock<HashMap<Uuid, RegistryEntry>>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a background dispatch, keyed by its handle id.
    pub async fn register(&self, handle: &ExecutionHandle, payload: impl Into<String>) -> Uuid {
        let now = Utc::now();
        let entry = RegistryEntry {
            id: handle.id,
            agent: handle.agent.clone(),
            payload: payload.into(),
            task_ref: None,
            status: ExecutionStatus::Pending,
            started_at: now,
            last_heartbeat: now,
            retries: 0,
            note: None,
            result: None,
            error: None,
            finished_at: None,
        };
        let mut entries = self.entries.write().await;
        entries.insert(entry.id, entry);
        handle.id
    }

    /// Binds an entry to the Ledger Task it works.
    pub async fn bind_task(&self, entry_id: Uuid, epic: impl Into<String>, task: impl Into<String>) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&entry_id) {
            entry.task_ref = Some(TaskRef {
                epic: epic.into(),
                task: task.into(),
            });
        }
    }

    /// Marks an entry running and refreshes its heartbeat.
    pub async fn mark_running(&self, entry_id: Uuid) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&entry_id) {
            if !entry.status.is_terminal() {
                entry.status = ExecutionStatus::Running;
                entry.last_heartbeat = Utc::now();
            }
        }
    }

    /// Records a liveness signal. Never fails; unknown or terminal entries
    /// make this a no-op, so redundant calls are safe.
    pub async fn heartbeat(&self, entry_id: Uuid, note: Option<String>) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&entry_id) {
            if entry.status.is_terminal() {
                return;
            }
            entry.last_heartbeat = Utc::now();
            if note.is_some() {
                entry.note = note;
            }
        }
    }

    /// Completes an entry. The first terminal transition wins; a repeat
    /// call (with the same or a different payload) changes nothing.
    ///
    /// Returns whether the result was applied.
    pub async fn complete(&self, entry_id: Uuid, result: impl Into<String>) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&entry_id) else {
            return false;
        };
        if entry.status.is_terminal() {
            debug!(entry = %entry_id, status = ?entry.status, "late result ignored");
            return false;
        }
        entry.status = ExecutionStatus::Completed;
        entry.result = Some(result.into());
        entry.finished_at = Some(Utc::now());
        true
    }

    /// Fails an entry. Exactly-once like [`TaskRegistry::complete`].
    pub async fn fail(&self, entry_id: Uuid, error: impl Into<String>) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&entry_id) else {
            return false;
        };
        if entry.status.is_terminal() {
            debug!(entry = %entry_id, status = ?entry.status, "late failure ignored");
            return false;
        }
        entry.status = ExecutionStatus::Failed;
        entry.error = Some(error.into());
        entry.finished_at = Some(Utc::now());
        true
    }

    /// Prepares a stale entry for another attempt: bumps the retry count,
    /// resets the attempt clock, and returns a snapshot for re-dispatch.
    /// Terminal entries are not retried.
    pub async fn prepare_retry(&self, entry_id: Uuid) -> Option<RegistryEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&entry_id)?;
        if entry.status.is_terminal() {
            return None;
        }
        let now = Utc::now();
        entry.retries += 1;
        entry.status = ExecutionStatus::Pending;
        entry.started_at = now;
        entry.last_heartbeat = now;
        Some(entry.clone())
    }

    /// Returns a snapshot of one entry.
    pub async fn get(&self, entry_id: Uuid) -> Option<RegistryEntry> {
        let entries = self.entries.read().await;
        entries.get(&entry_id).cloned()
    }

    /// Snapshots every entry, oldest first.
    pub async fn list(&self) -> Vec<RegistryEntry> {
        let entries = self.entries.read().await;
        let mut list: Vec<RegistryEntry> = entries.values().cloned().collect();
        list.sort_by_key(|e| e.started_at);
        list
    }

    /// Snapshots the entries that have not reached a terminal state.
    pub async fn outstanding(&self) -> Vec<RegistryEntry> {
        let entries = self.entries.read().await;
        let mut list: Vec<RegistryEntry> = entries
            .values()
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect();
        list.sort_by_key(|e| e.started_at);
        list
    }

    /// Garbage-collects terminal entries whose results have been retained
    /// past the window. Returns how many were removed.
    pub async fn prune(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| match (e.status.is_terminal(), e.finished_at) {
            (true, Some(finished)) => finished > cutoff,
            _ => true,
        });
        before - entries.len()
    }

    /// Number of tracked entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry tracks no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use foreman_core::DispatchMode;

    async fn registered(registry: &TaskRegistry) -> Uuid {
        let handle = ExecutionHandle::new("coder", DispatchMode::Background);
        registry.register(&handle, "payload").await
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = TaskRegistry::new();
        let id = registered(&registry).await;

        let entry = registry.get(id).await.unwrap();
        assert_eq!(entry.agent, "coder");
        assert_eq!(entry.status, ExecutionStatus::Pending);
        assert_eq!(entry.retries, 0);
    }

    #[tokio::test]
    async fn test_idempotent_completion_first_call_wins() {
        let registry = TaskRegistry::new();
        let id = registered(&registry).await;
        registry.mark_running(id).await;

        assert!(registry.complete(id, "first").await);
        assert!(!registry.complete(id, "second").await);
        assert!(!registry.fail(id, "too late").await);

        let entry = registry.get(id).await.unwrap();
        assert_eq!(entry.status, ExecutionStatus::Completed);
        assert_eq!(entry.result.as_deref(), Some("first"));
        assert!(entry.error.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_is_redundant_safe() {
        let registry = TaskRegistry::new();
        let id = registered(&registry).await;
        registry.mark_running(id).await;

        let before = registry.get(id).await.unwrap().last_heartbeat;
        registry.heartbeat(id, None).await;
        registry.heartbeat(id, Some("indexing".to_string())).await;
        registry.heartbeat(Uuid::new_v4(), None).await; // unknown id: no-op

        let entry = registry.get(id).await.unwrap();
        assert!(entry.last_heartbeat >= before);
        assert_eq!(entry.note.as_deref(), Some("indexing"));
    }

    #[tokio::test]
    async fn test_heartbeat_after_terminal_is_ignored() {
        let registry = TaskRegistry::new();
        let id = registered(&registry).await;
        registry.fail(id, "boom").await;

        let finished = registry.get(id).await.unwrap().last_heartbeat;
        registry.heartbeat(id, None).await;
        assert_eq!(registry.get(id).await.unwrap().last_heartbeat, finished);
    }

    #[tokio::test]
    async fn test_prepare_retry_resets_attempt() {
        let registry = TaskRegistry::new();
        let id = registered(&registry).await;
        registry.mark_running(id).await;

        let entry = registry.prepare_retry(id).await.unwrap();
        assert_eq!(entry.retries, 1);
        assert_eq!(entry.status, ExecutionStatus::Pending);

        registry.complete(id, "done").await;
        assert!(registry.prepare_retry(id).await.is_none());
    }

    #[tokio::test]
    async fn test_outstanding_excludes_terminal() {
        let registry = TaskRegistry::new();
        let a = registered(&registry).await;
        let b = registered(&registry).await;
        registry.complete(a, "done").await;

        let outstanding = registry.outstanding().await;
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].id, b);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_prune_removes_only_old_terminal_entries() {
        let registry = TaskRegistry::new();
        let a = registered(&registry).await;
        let _b = registered(&registry).await;
        registry.complete(a, "done").await;

        // Nothing is old enough yet.
        assert_eq!(registry.prune(Duration::from_secs(60)).await, 0);

        // With a zero retention window the terminal entry goes.
        assert_eq!(registry.prune(Duration::ZERO).await, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_bind_task() {
        let registry = TaskRegistry::new();
        let id = registered(&registry).await;
        registry.bind_task(id, "1", "1.2").await;

        let entry = registry.get(id).await.unwrap();
        assert_eq!(
            entry.task_ref,
            Some(TaskRef {
                epic: "1".to_string(),
                task: "1.2".to_string()
            })
        );
    }
}
