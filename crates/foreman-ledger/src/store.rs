use crate::fs::{append_line, atomic_write, atomic_write_json, read_json_opt, read_string_opt};
use crate::types::{
    Epic, EpicOutcome, EpicStatus, Handoff, Learning, LearningKind, LedgerIndex, TaskRecord,
    TaskStatus,
};
use chrono::Utc;
use foreman_core::{ForemanError, ForemanResult};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How many Learning texts the index keeps as its recent tail.
const LEARNING_TAIL: usize = 10;

/// Default per-Epic Task bound.
const DEFAULT_TASK_LIMIT: usize = 5;

/// The durable state machine of Epics, Tasks, Learnings, and Handoffs.
///
/// One directory per workspace; every artifact write is atomic
/// (temp-then-rename), and the single active-Epic slot is guarded by an
/// internal write lock so the "one active Epic" invariant is enforced at
/// write time, not just at read time.
pub struct Ledger {
    root: PathBuf,
    task_limit: usize,
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Opens (or initializes) the Ledger rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> ForemanResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("epics")).await?;
        tokio::fs::create_dir_all(root.join("archive")).await?;
        tokio::fs::create_dir_all(root.join("learnings")).await?;
        Ok(Self {
            root,
            task_limit: DEFAULT_TASK_LIMIT,
            write_lock: Mutex::new(()),
        })
    }

    /// Overrides the per-Epic Task bound.
    pub fn with_task_limit(mut self, limit: usize) -> Self {
        self.task_limit = limit;
        self
    }

    /// The workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn handoff_path(&self) -> PathBuf {
        self.root.join("handoff.json")
    }

    fn epic_dir(&self, epic_id: &str) -> PathBuf {
        self.root.join("epics").join(epic_id)
    }

    fn archive_dir(&self, epic_id: &str) -> PathBuf {
        self.root.join("archive").join(epic_id)
    }

    fn learning_path(&self, kind: LearningKind) -> PathBuf {
        self.root
            .join("learnings")
            .join(format!("{}.jsonl", kind.partition()))
    }

    /// Reads the workspace index; missing or malformed means a fresh one.
    pub async fn index(&self) -> ForemanResult<LedgerIndex> {
        Ok(read_json_opt(&self.index_path())
            .await?
            .unwrap_or_default())
    }

    async fn write_index(&self, mut index: LedgerIndex) -> ForemanResult<()> {
        index.updated_at = Utc::now();
        atomic_write_json(&self.index_path(), &index).await
    }

    async fn write_epic(&self, epic: &mut Epic) -> ForemanResult<()> {
        epic.updated_at = Utc::now();
        atomic_write_json(&self.epic_dir(&epic.id).join("epic.json"), epic).await
    }

    // --- Epics ---

    /// Creates a new Epic and claims the active slot.
    ///
    /// Fails with [`ForemanError::EpicAlreadyActive`] if the slot is
    /// occupied; the existing Epic is left untouched.
    pub async fn create_epic(
        &self,
        title: impl Into<String>,
        request: impl Into<String>,
    ) -> ForemanResult<Epic> {
        let _guard = self.write_lock.lock().await;

        let mut index = self.index().await?;
        if let Some(active) = &index.active_epic {
            return Err(ForemanError::EpicAlreadyActive {
                active: active.clone(),
            });
        }

        let id = index.next_epic.to_string();
        let now = Utc::now();
        let mut epic = Epic {
            id: id.clone(),
            title: title.into(),
            request: request.into(),
            status: EpicStatus::Draft,
            tasks: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.write_epic(&mut epic).await?;

        index.active_epic = Some(id.clone());
        index.phase = Some(EpicStatus::Draft);
        index.next_epic += 1;
        self.write_index(index).await?;

        info!(epic = %id, title = %epic.title, "epic created");
        Ok(epic)
    }

    /// Returns the Epic in the active slot, if any.
    ///
    /// A dangling pointer (index names an Epic whose artifact is missing or
    /// malformed) reads as no active Epic.
    pub async fn active_epic(&self) -> ForemanResult<Option<Epic>> {
        let index = self.index().await?;
        let Some(id) = index.active_epic else {
            return Ok(None);
        };
        let epic: Option<Epic> = read_json_opt(&self.epic_dir(&id).join("epic.json")).await?;
        if epic.is_none() {
            warn!(epic = %id, "active slot points at a missing epic artifact");
        }
        Ok(epic)
    }

    async fn require_active(&self) -> ForemanResult<Epic> {
        self.active_epic().await?.ok_or(ForemanError::NoActiveEpic)
    }

    /// Moves the active Epic through its lifecycle phases.
    pub async fn set_phase(&self, status: EpicStatus) -> ForemanResult<Epic> {
        let _guard = self.write_lock.lock().await;
        let mut epic = self.require_active().await?;
        epic.status = status;
        self.write_epic(&mut epic).await?;

        let mut index = self.index().await?;
        index.phase = Some(status);
        self.write_index(index).await?;
        Ok(epic)
    }

    // --- Tasks ---

    /// Adds a Task to the active Epic, assigning the next `E.N` id.
    ///
    /// Fails with [`ForemanError::TaskLimitExceeded`] once the Epic holds
    /// the configured maximum.
    pub async fn add_task(
        &self,
        title: impl Into<String>,
        agent: impl Into<String>,
        depends_on: Vec<String>,
    ) -> ForemanResult<TaskRecord> {
        let _guard = self.write_lock.lock().await;
        let mut epic = self.require_active().await?;

        if epic.tasks.len() >= self.task_limit {
            return Err(ForemanError::TaskLimitExceeded {
                limit: self.task_limit,
            });
        }

        for dep in &depends_on {
            if epic.task(dep).is_none() {
                return Err(ForemanError::Ledger(format!(
                    "dependency '{dep}' does not exist in epic '{}'",
                    epic.id
                )));
            }
        }

        let task = TaskRecord {
            id: format!("{}.{}", epic.id, epic.tasks.len() + 1),
            title: title.into(),
            agent: agent.into(),
            status: TaskStatus::Pending,
            depends_on,
            result: None,
            error: None,
            handle: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        epic.tasks.push(task.clone());
        self.write_epic(&mut epic).await?;

        debug!(epic = %epic.id, task = %task.id, agent = %task.agent, "task added");
        Ok(task)
    }

    /// Transitions a Task's status.
    ///
    /// Moving to `running` fails with [`ForemanError::DependencyUnmet`]
    /// unless every dependency is `completed`. Transitions for one Task are
    /// totally ordered by the Ledger's write lock.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> ForemanResult<TaskRecord> {
        let _guard = self.write_lock.lock().await;
        let mut epic = self.require_active().await?;
        self.transition_task(&mut epic, task_id, status, None, None)
            .await
    }

    /// Marks a Task `completed` with its result payload.
    pub async fn complete_task(
        &self,
        task_id: &str,
        result: impl Into<String>,
    ) -> ForemanResult<TaskRecord> {
        let _guard = self.write_lock.lock().await;
        let mut epic = self.require_active().await?;
        self.transition_task(
            &mut epic,
            task_id,
            TaskStatus::Completed,
            Some(result.into()),
            None,
        )
        .await
    }

    /// Marks a Task `failed` with its error payload.
    pub async fn fail_task(
        &self,
        task_id: &str,
        error: impl Into<String>,
    ) -> ForemanResult<TaskRecord> {
        let _guard = self.write_lock.lock().await;
        let mut epic = self.require_active().await?;
        self.transition_task(
            &mut epic,
            task_id,
            TaskStatus::Failed,
            None,
            Some(error.into()),
        )
        .await
    }

    /// Records the execution handle working a Task.
    pub async fn assign_handle(&self, task_id: &str, handle: Uuid) -> ForemanResult<TaskRecord> {
        let _guard = self.write_lock.lock().await;
        let mut epic = self.require_active().await?;
        let task = epic
            .task_mut(task_id)
            .ok_or_else(|| ForemanError::Ledger(format!("unknown task '{task_id}'")))?;
        task.handle = Some(handle);
        let task = task.clone();
        self.write_epic(&mut epic).await?;
        Ok(task)
    }

    async fn transition_task(
        &self,
        epic: &mut Epic,
        task_id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> ForemanResult<TaskRecord> {
        if status == TaskStatus::Running {
            let task = epic
                .task(task_id)
                .ok_or_else(|| ForemanError::Ledger(format!("unknown task '{task_id}'")))?;
            for dep in &task.depends_on {
                let dep_status = epic.task(dep).map(|t| t.status);
                if dep_status != Some(TaskStatus::Completed) {
                    return Err(ForemanError::DependencyUnmet {
                        task: task_id.to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let task = epic
            .task_mut(task_id)
            .ok_or_else(|| ForemanError::Ledger(format!("unknown task '{task_id}'")))?;
        task.status = status;
        if let Some(result) = result {
            task.result = Some(result);
        }
        if let Some(error) = error {
            task.error = Some(error);
        }
        if status.is_terminal() {
            task.completed_at = Some(Utc::now());
        }
        let task = task.clone();
        self.write_epic(epic).await?;

        debug!(epic = %epic.id, task = %task.id, status = ?task.status, "task status updated");
        Ok(task)
    }

    // --- Per-Epic artifacts ---

    /// Writes the active Epic's specification artifact.
    pub async fn write_spec(&self, content: &str) -> ForemanResult<()> {
        let epic = self.require_active().await?;
        atomic_write(&self.epic_dir(&epic.id).join("spec.md"), content.as_bytes()).await
    }

    /// Writes the active Epic's plan artifact.
    pub async fn write_plan(&self, content: &str) -> ForemanResult<()> {
        let epic = self.require_active().await?;
        atomic_write(&self.epic_dir(&epic.id).join("plan.md"), content.as_bytes()).await
    }

    /// Appends one line to the active Epic's execution log.
    pub async fn append_log(&self, line: &str) -> ForemanResult<()> {
        let epic = self.require_active().await?;
        append_line(&self.epic_dir(&epic.id).join("log.md"), line).await
    }

    /// Reads an artifact (`spec.md`, `plan.md`, `log.md`) of the active Epic.
    pub async fn artifact(&self, name: &str) -> ForemanResult<Option<String>> {
        let epic = self.require_active().await?;
        read_string_opt(&self.epic_dir(&epic.id).join(name)).await
    }

    // --- Learnings ---

    /// Appends a Learning to its kind partition and refreshes the index
    /// tail. Append-only: Learnings are never rewritten or deleted.
    pub async fn add_learning(
        &self,
        kind: LearningKind,
        text: impl Into<String>,
        source_epic: Option<String>,
        source_agent: Option<String>,
    ) -> ForemanResult<Learning> {
        let learning = Learning {
            id: Uuid::new_v4(),
            kind,
            text: text.into(),
            source_epic,
            source_agent,
            created_at: Utc::now(),
        };
        let line = serde_json::to_string(&learning)?;
        append_line(&self.learning_path(kind), &line).await?;

        let _guard = self.write_lock.lock().await;
        let mut index = self.index().await?;
        index.recent_learnings.push(learning.text.clone());
        if index.recent_learnings.len() > LEARNING_TAIL {
            let excess = index.recent_learnings.len() - LEARNING_TAIL;
            index.recent_learnings.drain(..excess);
        }
        self.write_index(index).await?;

        Ok(learning)
    }

    /// Reads every Learning of one kind, oldest first. Unparsable lines
    /// (e.g. a truncated tail after a crash) are skipped with a warning.
    pub async fn learnings(&self, kind: LearningKind) -> ForemanResult<Vec<Learning>> {
        let Some(content) = read_string_opt(&self.learning_path(kind)).await? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Learning>(line) {
                Ok(learning) => out.push(learning),
                Err(e) => {
                    warn!(kind = ?kind, error = %e, "skipping malformed learning line");
                }
            }
        }
        Ok(out)
    }

    /// The index's bounded tail of recent Learning texts, newest last.
    pub async fn recent_learnings(&self) -> ForemanResult<Vec<String>> {
        Ok(self.index().await?.recent_learnings)
    }

    // --- Archive ---

    /// Archives the active Epic: moves its full artifact set to immutable
    /// storage, records the outcome, and clears the active slot.
    pub async fn archive_epic(&self, outcome: EpicOutcome) -> ForemanResult<Epic> {
        let _guard = self.write_lock.lock().await;

        let mut index = self.index().await?;
        let id = index.active_epic.clone().ok_or(ForemanError::NoActiveEpic)?;
        let epic: Epic = read_json_opt(&self.epic_dir(&id).join("epic.json"))
            .await?
            .ok_or_else(|| {
                ForemanError::Ledger(format!("active epic '{id}' has no artifact to archive"))
            })?;

        let outcome_record = serde_json::json!({
            "outcome": outcome,
            "archived_at": Utc::now(),
        });
        atomic_write_json(&self.epic_dir(&id).join("outcome.json"), &outcome_record).await?;

        let target = self.archive_dir(&id);
        if target.exists() {
            return Err(ForemanError::Ledger(format!(
                "archive slot for epic '{id}' already exists"
            )));
        }
        tokio::fs::rename(self.epic_dir(&id), &target).await?;

        index.active_epic = None;
        index.phase = None;
        self.write_index(index).await?;

        info!(epic = %id, outcome = ?outcome, "epic archived");
        Ok(epic)
    }

    /// Reads an archived Epic's state record.
    pub async fn archived_epic(&self, epic_id: &str) -> ForemanResult<Option<Epic>> {
        read_json_opt(&self.archive_dir(epic_id).join("epic.json")).await
    }

    /// Reads an archived Epic's artifact (`spec.md`, `plan.md`, `log.md`,
    /// `outcome.json`).
    pub async fn archived_artifact(
        &self,
        epic_id: &str,
        name: &str,
    ) -> ForemanResult<Option<String>> {
        read_string_opt(&self.archive_dir(epic_id).join(name)).await
    }

    // --- Handoff ---

    /// Writes the single-slot Handoff. Creating over an existing Handoff
    /// overwrites it (last-writer-wins by design).
    pub async fn create_handoff(
        &self,
        reason: impl Into<String>,
        resume: impl Into<String>,
        summary: impl Into<String>,
    ) -> ForemanResult<Handoff> {
        let handoff = Handoff {
            reason: reason.into(),
            resume: resume.into(),
            summary: summary.into(),
            created_at: Utc::now(),
        };
        atomic_write_json(&self.handoff_path(), &handoff).await?;
        info!(reason = %handoff.reason, "handoff created");
        Ok(handoff)
    }

    /// Consumes the Handoff: returns it and clears the slot in one step.
    pub async fn take_handoff(&self) -> ForemanResult<Option<Handoff>> {
        let _guard = self.write_lock.lock().await;
        let handoff: Option<Handoff> = read_json_opt(&self.handoff_path()).await?;
        if handoff.is_some() {
            tokio::fs::remove_file(self.handoff_path()).await?;
        }
        Ok(handoff)
    }

    /// Clears the Handoff slot without reading it.
    pub async fn clear_handoff(&self) -> ForemanResult<()> {
        match tokio::fs::remove_file(self.handoff_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
