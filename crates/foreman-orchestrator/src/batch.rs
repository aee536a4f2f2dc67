use crate::context::DispatchContext;
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::registry::RegistryEntry;
use foreman_core::{ExecutionHandle, ExecutionStatus, ForemanError, ForemanResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// One requested dispatch inside a batch.
#[derive(Debug, Clone)]
pub struct BatchTask {
    /// Catalog name of the agent.
    pub agent: String,
    /// The prompt.
    pub prompt: String,
    /// Optional structured context.
    pub context: Option<DispatchContext>,
}

impl BatchTask {
    /// Creates a batch task.
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            prompt: prompt.into(),
            context: None,
        }
    }

    /// Attaches structured context.
    pub fn with_context(mut self, context: DispatchContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Result of a batch spawn.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Handles of the spawned dispatches, in request order.
    pub handles: Vec<ExecutionHandle>,
    /// Collected results when the spawn waited.
    pub results: Option<Gathered>,
    /// Whether the wait hit its timeout before everything resolved.
    pub timed_out: bool,
}

/// Classification of a set of Registry entries at collection time.
#[derive(Debug, Clone, Default)]
pub struct Gathered {
    /// Entries that completed, with their results.
    pub completed: Vec<RegistryEntry>,
    /// Entries that failed or timed out, with their errors.
    pub failed: Vec<RegistryEntry>,
    /// Entry ids still unresolved when collection stopped.
    pub pending: Vec<Uuid>,
    /// Whether collection stopped on the timeout rather than resolution.
    pub timed_out: bool,
}

impl Gathered {
    /// Whether every requested entry resolved.
    pub fn is_fully_resolved(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Fan-out of independent dispatches and fan-in over the Registry.
pub struct BatchCoordinator {
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
}

impl BatchCoordinator {
    /// Creates a coordinator that polls the registry at `poll_interval`
    /// while collecting.
    pub fn new(dispatcher: Arc<Dispatcher>, poll_interval: Duration) -> Self {
        Self {
            dispatcher,
            poll_interval,
        }
    }

    /// Spawns every task in the batch as a background dispatch.
    ///
    /// Validation is all-or-nothing: every requested agent must resolve
    /// against the catalog before anything is dispatched, so a bad batch
    /// never leaves a partial spawn behind. With `wait`, polls the
    /// Registry until all entries resolve or `timeout` elapses, returning
    /// whichever subset has resolved plus the `timed_out` flag.
    pub async fn spawn_batch(
        &self,
        tasks: Vec<BatchTask>,
        wait: bool,
        timeout: Duration,
    ) -> ForemanResult<BatchOutcome> {
        if tasks.is_empty() {
            return Err(ForemanError::Batch("empty batch".to_string()));
        }

        // All-or-nothing validation before any dispatch.
        for task in &tasks {
            self.dispatcher.catalog().resolve(&task.agent)?;
        }

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut request = DispatchRequest::new(task.agent, task.prompt);
            if let Some(context) = task.context {
                request = request.with_context(context);
            }
            let handle = self.dispatcher.dispatch_background(request).await?;
            handles.push(handle);
        }
        info!(count = handles.len(), wait, "batch spawned");

        if !wait {
            return Ok(BatchOutcome {
                handles,
                results: None,
                timed_out: false,
            });
        }

        let ids: Vec<Uuid> = handles.iter().map(|h| h.id).collect();
        let gathered = self.gather(&ids, timeout, true).await?;
        let timed_out = gathered.timed_out;
        Ok(BatchOutcome {
            handles,
            results: Some(gathered),
            timed_out,
        })
    }

    /// Collects a set of background dispatches.
    ///
    /// Polls the Registry until every entry is terminal or `timeout`
    /// elapses. With `partial` the caller receives whatever resolved plus
    /// the pending remainder and a `timed_out` flag; without it, a timeout
    /// is an error. Either way the caller never waits past its own bound.
    pub async fn gather(
        &self,
        entry_ids: &[Uuid],
        timeout: Duration,
        partial: bool,
    ) -> ForemanResult<Gathered> {
        let registry = self.dispatcher.registry();
        let deadline = Instant::now() + timeout;

        loop {
            let mut gathered = Gathered::default();
            for &id in entry_ids {
                match registry.get(id).await {
                    Some(entry) if entry.status == ExecutionStatus::Completed => {
                        gathered.completed.push(entry);
                    }
                    Some(entry) if entry.status.is_terminal() => {
                        gathered.failed.push(entry);
                    }
                    Some(_) => gathered.pending.push(id),
                    // Unknown ids stay pending; they may simply not be
                    // registered yet from the caller's point of view.
                    None => gathered.pending.push(id),
                }
            }

            if gathered.pending.is_empty() {
                debug!(
                    completed = gathered.completed.len(),
                    failed = gathered.failed.len(),
                    "gather fully resolved"
                );
                return Ok(gathered);
            }

            if Instant::now() >= deadline {
                if partial {
                    gathered.timed_out = true;
                    debug!(pending = gathered.pending.len(), "gather timed out with partial results");
                    return Ok(gathered);
                }
                return Err(ForemanError::Batch(format!(
                    "gather timed out with {} entries unresolved",
                    gathered.pending.len()
                )));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::TaskRegistry;
    use async_trait::async_trait;
    use foreman_core::{
        AgentCatalog, AgentDescriptor, ExecutionHost, HeartbeatSender,
    };

    /// Host that resolves instantly except for the `stuck` agent.
    struct PartialHost;

    #[async_trait]
    impl ExecutionHost for PartialHost {
        async fn execute(
            &self,
            agent: &AgentDescriptor,
            _payload: &str,
            pulse: HeartbeatSender,
        ) -> ForemanResult<String> {
            pulse.beat();
            match agent.name.as_str() {
                "stuck" => std::future::pending().await,
                "flaky" => Err(ForemanError::SpawnFailed("no route".to_string())),
                name => Ok(format!("{name} done")),
            }
        }
    }

    fn coordinator() -> BatchCoordinator {
        let catalog = AgentCatalog::from_descriptors(vec![
            AgentDescriptor::new("alpha", "worker a"),
            AgentDescriptor::new("gamma", "worker c"),
            AgentDescriptor::new("stuck", "never resolves"),
            AgentDescriptor::new("flaky", "always fails"),
        ]);
        let dispatcher = Dispatcher::new(
            Arc::new(catalog),
            Arc::new(PartialHost),
            Arc::new(TaskRegistry::new()),
        );
        BatchCoordinator::new(Arc::new(dispatcher), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_partial_collection_on_timeout() {
        let coordinator = coordinator();
        let outcome = coordinator
            .spawn_batch(
                vec![
                    BatchTask::new("alpha", "work a"),
                    BatchTask::new("stuck", "work b"),
                    BatchTask::new("gamma", "work c"),
                ],
                true,
                Duration::from_millis(200),
            )
            .await
            .unwrap();

        assert!(outcome.timed_out);
        let results = outcome.results.unwrap();
        assert_eq!(results.completed.len(), 2);
        assert_eq!(results.pending.len(), 1);
        assert!(results.failed.is_empty());

        let stuck_id = outcome
            .handles
            .iter()
            .find(|h| h.agent == "stuck")
            .unwrap()
            .id;
        assert_eq!(results.pending, vec![stuck_id]);

        let mut outputs: Vec<String> = results
            .completed
            .iter()
            .map(|e| e.result.clone().unwrap())
            .collect();
        outputs.sort();
        assert_eq!(outputs, vec!["alpha done", "gamma done"]);
    }

    #[tokio::test]
    async fn test_all_or_nothing_validation() {
        let coordinator = coordinator();
        let err = coordinator
            .spawn_batch(
                vec![
                    BatchTask::new("alpha", "fine"),
                    BatchTask::new("nonexistent", "bad"),
                ],
                false,
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::AgentNotFound { .. }));

        // Nothing was dispatched: partial validation followed by partial
        // spawn would leave an inconsistent batch.
        assert!(coordinator.dispatcher.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_failures_are_collected_not_hidden() {
        let coordinator = coordinator();
        let outcome = coordinator
            .spawn_batch(
                vec![
                    BatchTask::new("alpha", "ok"),
                    BatchTask::new("flaky", "will fail"),
                ],
                true,
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        assert!(!outcome.timed_out);
        let results = outcome.results.unwrap();
        assert_eq!(results.completed.len(), 1);
        assert_eq!(results.failed.len(), 1);
        assert!(results.failed[0].error.as_deref().unwrap().contains("no route"));
    }

    #[tokio::test]
    async fn test_strict_gather_errors_on_timeout() {
        let coordinator = coordinator();
        let outcome = coordinator
            .spawn_batch(
                vec![BatchTask::new("stuck", "never")],
                false,
                Duration::ZERO,
            )
            .await
            .unwrap();

        let ids: Vec<Uuid> = outcome.handles.iter().map(|h| h.id).collect();
        let err = coordinator
            .gather(&ids, Duration::from_millis(50), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::Batch(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let coordinator = coordinator();
        let err = coordinator
            .spawn_batch(vec![], true, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::Batch(_)));
    }
}
