use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a dispatch interacts with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// The call returns only once the execution reaches a terminal state.
    /// Suspension is cooperative: only the logical caller waits.
    Blocking,
    /// The call returns a handle immediately; the caller registers it with
    /// the Task Registry and collects the result later.
    Background,
}

/// Lifecycle status of one agent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created but not yet started by the host.
    Pending,
    /// The host is executing.
    Running,
    /// Terminal: finished with a result.
    Completed,
    /// Terminal: finished with an error.
    Failed,
    /// Terminal: abandoned after the caller's timeout elapsed.
    TimedOut,
}

impl ExecutionStatus {
    /// Terminal states are final and immutable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::TimedOut
        )
    }
}

/// Reference to one invocation of an agent.
///
/// Handles form a tree through `parent`; a child's completion or failure
/// never mutates the parent directly, only via explicit result propagation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHandle {
    /// Unique identifier for this execution.
    pub id: Uuid,
    /// Catalog name of the dispatched agent.
    pub agent: String,
    /// The execution that spawned this one, if any.
    pub parent: Option<Uuid>,
    /// Blocking or background.
    pub mode: DispatchMode,
    /// UTC timestamp of dispatch.
    pub created_at: DateTime<Utc>,
}

impl ExecutionHandle {
    /// Creates a root handle for the given agent and mode.
    pub fn new(agent: impl Into<String>, mode: DispatchMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent: agent.into(),
            parent: None,
            mode,
            created_at: Utc::now(),
        }
    }

    /// Attaches a parent execution, forming a tree.
    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::TimedOut.is_terminal());
    }

    #[test]
    fn test_handle_tree() {
        let root = ExecutionHandle::new("planner", DispatchMode::Blocking);
        let child = ExecutionHandle::new("coder", DispatchMode::Background).with_parent(root.id);
        assert_eq!(child.parent, Some(root.id));
        assert!(root.parent.is_none());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExecutionStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        let parsed: ExecutionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ExecutionStatus::TimedOut);
    }
}
