use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of one Task inside an Epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Assigned but not started.
    Pending,
    /// An execution is in flight. Requires every dependency `completed`.
    Running,
    /// Terminal: finished with a result.
    Completed,
    /// Terminal: finished with an error.
    Failed,
    /// Parked behind an unresolved dependency or external condition.
    Blocked,
    /// Terminal: intentionally not executed.
    Skipped,
}

impl TaskStatus {
    /// Whether the status is terminal for the Task.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// One unit of assigned work inside an Epic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Stable epic-scoped identifier, e.g. `1.2`.
    pub id: String,
    /// Short description of the work.
    pub title: String,
    /// Catalog name of the assigned agent.
    pub agent: String,
    /// Current status.
    pub status: TaskStatus,
    /// Ids of Tasks that must be `completed` before this one may run.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Result payload once completed.
    #[serde(default)]
    pub result: Option<String>,
    /// Error payload once failed.
    #[serde(default)]
    pub error: Option<String>,
    /// Execution handle of the dispatch working this Task, if any.
    #[serde(default)]
    pub handle: Option<Uuid>,
    /// UTC timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// UTC timestamp of reaching a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle phase of an Epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    /// Captured but not yet planned.
    Draft,
    /// Being decomposed into Tasks.
    Planning,
    /// Tasks are executing.
    InProgress,
    /// Execution finished, results under review.
    Review,
    /// All work resolved successfully.
    Completed,
    /// Work abandoned or unrecoverable.
    Failed,
    /// Suspended, e.g. across a handoff.
    Paused,
}

/// Terminal outcome recorded when an Epic is archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpicOutcome {
    /// Every Task completed.
    Succeeded,
    /// Some Tasks completed, some did not.
    Partial,
    /// The Epic failed as a whole.
    Failed,
}

/// A bounded unit of work: at most one Epic is active per workspace.
///
/// The specification, plan, and execution log are stored as independent
/// file artifacts next to this record, not as fields on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    /// Workspace-scoped ordinal identifier, e.g. `3`.
    pub id: String,
    /// Short title.
    pub title: String,
    /// The original free-form request this Epic was created for.
    pub request: String,
    /// Current phase.
    pub status: EpicStatus,
    /// Ordered, size-bounded set of Tasks.
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    /// UTC timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// UTC timestamp of the last mutation.
    pub updated_at: DateTime<Utc>,
}

impl Epic {
    /// Looks up a Task by id.
    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Looks up a Task by id, mutably.
    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Whether every Task is in a terminal status.
    pub fn all_tasks_resolved(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }
}

/// Kind of an accumulated Learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LearningKind {
    /// An approach that worked and should be repeated.
    Pattern,
    /// An approach that failed and should be avoided.
    AntiPattern,
    /// A recorded decision and its context.
    Decision,
    /// A caller preference.
    Preference,
}

impl LearningKind {
    /// All kinds, in partition order.
    pub fn all() -> [LearningKind; 4] {
        [
            LearningKind::Pattern,
            LearningKind::AntiPattern,
            LearningKind::Decision,
            LearningKind::Preference,
        ]
    }

    /// File-name stem of the kind's append-only partition.
    pub fn partition(&self) -> &'static str {
        match self {
            LearningKind::Pattern => "pattern",
            LearningKind::AntiPattern => "antiPattern",
            LearningKind::Decision => "decision",
            LearningKind::Preference => "preference",
        }
    }
}

/// An immutable, append-only recorded fact. Never deleted, only
/// accumulated and periodically summarized into new Epics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    /// Unique identifier.
    pub id: Uuid,
    /// The kind of fact.
    pub kind: LearningKind,
    /// Free text.
    pub text: String,
    /// Epic the fact originated from, if any.
    #[serde(default)]
    pub source_epic: Option<String>,
    /// Agent the fact originated from, if any.
    #[serde(default)]
    pub source_agent: Option<String>,
    /// UTC timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// Single-slot durable note allowing a new process to resume an
/// interrupted Epic. Created before an expected interruption, consumed
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    /// Why the interruption happened or is expected.
    pub reason: String,
    /// Instruction for the resuming process.
    pub resume: String,
    /// Short summary of where work stood.
    pub summary: String,
    /// UTC timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// The workspace index artifact: active-Epic pointer, current phase, and a
/// short tail of recent Learnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerIndex {
    /// Id of the Epic in the active slot, if any.
    #[serde(default)]
    pub active_epic: Option<String>,
    /// Phase of the active Epic.
    #[serde(default)]
    pub phase: Option<EpicStatus>,
    /// Ordinal handed to the next created Epic.
    #[serde(default = "default_next_epic")]
    pub next_epic: u64,
    /// Bounded tail of recent Learning texts, newest last.
    #[serde(default)]
    pub recent_learnings: Vec<String>,
    /// UTC timestamp of the last index write.
    pub updated_at: DateTime<Utc>,
}

fn default_next_epic() -> u64 {
    1
}

impl Default for LedgerIndex {
    fn default() -> Self {
        Self {
            active_epic: None,
            phase: None,
            next_epic: default_next_epic(),
            recent_learnings: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}
