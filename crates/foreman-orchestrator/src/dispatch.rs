use crate::context::{build_payload, DispatchContext};
use crate::registry::{TaskRef, TaskRegistry};
use foreman_core::{
    AgentCatalog, AgentDescriptor, Dialogue, DispatchMode, ExecutionHandle, ExecutionHost,
    ExecutionStatus, ForemanError, ForemanResult, MemoryStore, heartbeat_channel,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How many memory records are injected into dispatch context.
const MEMORY_LIMIT: usize = 3;

/// One dispatch invocation: the agent, the prompt, and the optional
/// framing around it.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Catalog name of the agent to invoke.
    pub agent: String,
    /// The literal prompt, always placed last in the payload.
    pub prompt: String,
    /// Structured context injected ahead of the prompt.
    pub context: Option<DispatchContext>,
    /// Dialogue state when the interaction is multi-turn.
    pub dialogue: Option<Dialogue>,
    /// Prior exchange lines when continuing a dialogue.
    pub history: Vec<String>,
    /// Parent execution, when this dispatch is a child.
    pub parent: Option<Uuid>,
    /// Ledger Task this dispatch works, if any.
    pub task_ref: Option<TaskRef>,
}

impl DispatchRequest {
    /// Creates a bare request for an agent and prompt.
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            prompt: prompt.into(),
            context: None,
            dialogue: None,
            history: Vec::new(),
            parent: None,
            task_ref: None,
        }
    }

    /// Attaches structured context.
    pub fn with_context(mut self, context: DispatchContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Marks the request as part of a multi-turn dialogue.
    pub fn with_dialogue(mut self, dialogue: Dialogue) -> Self {
        self.dialogue = Some(dialogue);
        self
    }

    /// Attaches prior dialogue history.
    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    /// Attaches a parent execution.
    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Binds the dispatch to a Ledger Task.
    pub fn for_task(mut self, epic: impl Into<String>, task: impl Into<String>) -> Self {
        self.task_ref = Some(TaskRef {
            epic: epic.into(),
            task: task.into(),
        });
        self
    }
}

/// Terminal outcome of a blocking dispatch.
///
/// Transport and spawn failures land here as data (`status: Failed` with
/// the error message), never as an `Err`: the boundary must not leave the
/// caller in an ambiguous state. `Err` is reserved for validation
/// failures such as an unknown agent.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The handle of the finished execution.
    pub handle: ExecutionHandle,
    /// Terminal status.
    pub status: ExecutionStatus,
    /// Output on success.
    pub output: Option<String>,
    /// Error message on failure.
    pub error: Option<String>,
}

impl ExecutionReport {
    /// Whether the execution completed with output.
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// The dispatch protocol: resolves agents, assembles payloads, and runs
/// executions in blocking or background mode.
pub struct Dispatcher {
    catalog: Arc<AgentCatalog>,
    host: Arc<dyn ExecutionHost>,
    registry: Arc<TaskRegistry>,
    memory: Option<Arc<dyn MemoryStore>>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given catalog, host, and registry.
    pub fn new(
        catalog: Arc<AgentCatalog>,
        host: Arc<dyn ExecutionHost>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            catalog,
            host,
            registry,
            memory: None,
        }
    }

    /// Attaches a long-term memory store for context enrichment.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// The agent catalog.
    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    /// The task registry tracking background dispatches.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Populates `relevant_memories` from the memory store. Best effort:
    /// memory failures are logged and never block orchestration.
    async fn enrich(&self, request: &DispatchRequest) -> Option<DispatchContext> {
        let mut context = request.context.clone()?;
        if context.relevant_memories.is_empty() {
            if let Some(memory) = &self.memory {
                match memory.find(&request.prompt).await {
                    Ok(records) => {
                        context.relevant_memories = records
                            .into_iter()
                            .take(MEMORY_LIMIT)
                            .map(|r| r.text)
                            .collect();
                    }
                    Err(e) => {
                        warn!(error = %e, "memory lookup failed, dispatching without memories");
                    }
                }
            }
        }
        Some(context)
    }

    async fn assemble(&self, request: &DispatchRequest) -> String {
        let context = self.enrich(request).await;
        build_payload(
            request.dialogue.as_ref(),
            &request.history,
            context.as_ref(),
            &request.prompt,
        )
    }

    /// Dispatches in blocking mode: does not return until the execution
    /// reaches a terminal state. Suspension is cooperative; only this
    /// logical caller waits, unrelated work in the process proceeds.
    pub async fn dispatch_blocking(&self, request: DispatchRequest) -> ForemanResult<ExecutionReport> {
        let descriptor = self.catalog.resolve(&request.agent)?.clone();
        let payload = self.assemble(&request).await;

        let mut handle = ExecutionHandle::new(&descriptor.name, DispatchMode::Blocking);
        if let Some(parent) = request.parent {
            handle = handle.with_parent(parent);
        }
        info!(handle = %handle.id, agent = %descriptor.name, "dispatching (blocking)");

        // Blocking executions are not registry-tracked; liveness is the
        // caller's own await.
        let (pulse, beats) = heartbeat_channel();
        drop(beats);

        match self.host.execute(&descriptor, &payload, pulse).await {
            Ok(output) => Ok(ExecutionReport {
                handle,
                status: ExecutionStatus::Completed,
                output: Some(output),
                error: None,
            }),
            Err(e) => {
                let error = ForemanError::SpawnFailed(e.to_string()).to_string();
                warn!(handle = %handle.id, agent = %descriptor.name, error = %error, "blocking dispatch failed");
                Ok(ExecutionReport {
                    handle,
                    status: ExecutionStatus::Failed,
                    output: None,
                    error: Some(error),
                })
            }
        }
    }

    /// Dispatches in background mode: registers the handle with the
    /// Registry and returns it immediately. The result is collected later
    /// through the Registry (`gather`, or Registry introspection).
    pub async fn dispatch_background(
        &self,
        request: DispatchRequest,
    ) -> ForemanResult<ExecutionHandle> {
        let descriptor = self.catalog.resolve(&request.agent)?.clone();
        let payload = self.assemble(&request).await;

        let mut handle = ExecutionHandle::new(&descriptor.name, DispatchMode::Background);
        if let Some(parent) = request.parent {
            handle = handle.with_parent(parent);
        }

        let entry_id = self.registry.register(&handle, payload.clone()).await;
        if let Some(task_ref) = &request.task_ref {
            self.registry
                .bind_task(entry_id, task_ref.epic.clone(), task_ref.task.clone())
                .await;
        }
        info!(handle = %handle.id, agent = %descriptor.name, "dispatching (background)");

        spawn_execution(
            Arc::clone(&self.host),
            descriptor,
            payload,
            Arc::clone(&self.registry),
            entry_id,
        );
        Ok(handle)
    }
}

/// Runs one host execution as an independent unit, bridging its
/// heartbeats into the Registry and applying the terminal result
/// idempotently. Shared by background dispatch and Supervisor retries.
pub(crate) fn spawn_execution(
    host: Arc<dyn ExecutionHost>,
    agent: AgentDescriptor,
    payload: String,
    registry: Arc<TaskRegistry>,
    entry_id: Uuid,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        registry.mark_running(entry_id).await;

        let (pulse, mut beats) = heartbeat_channel();
        let exec = host.execute(&agent, &payload, pulse);
        tokio::pin!(exec);

        loop {
            tokio::select! {
                maybe_beat = beats.recv() => {
                    match maybe_beat {
                        Some(note) => registry.heartbeat(entry_id, note).await,
                        None => {
                            // Host dropped its pulse; only the result remains.
                            apply_result(&registry, entry_id, (&mut exec).await).await;
                            break;
                        }
                    }
                }
                result = &mut exec => {
                    apply_result(&registry, entry_id, result).await;
                    break;
                }
            }
        }
    })
}

async fn apply_result(registry: &TaskRegistry, entry_id: Uuid, result: ForemanResult<String>) {
    match result {
        Ok(output) => {
            if !registry.complete(entry_id, output).await {
                debug!(entry = %entry_id, "result arrived after entry was resolved; ignored");
            }
        }
        Err(e) => {
            let error = ForemanError::SpawnFailed(e.to_string()).to_string();
            if !registry.fail(entry_id, error).await {
                debug!(entry = %entry_id, "failure arrived after entry was resolved; ignored");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use foreman_core::HeartbeatSender;
    use std::time::Duration;

    /// Mock host: echoes the payload back, failing for the `broken` agent.
    struct EchoHost;

    #[async_trait]
    impl ExecutionHost for EchoHost {
        async fn execute(
            &self,
            agent: &AgentDescriptor,
            payload: &str,
            pulse: HeartbeatSender,
        ) -> ForemanResult<String> {
            pulse.beat();
            if agent.name == "broken" {
                return Err(ForemanError::SpawnFailed("transport down".to_string()));
            }
            Ok(format!("{}::{payload}", agent.name))
        }
    }

    fn dispatcher() -> Dispatcher {
        let catalog = AgentCatalog::from_descriptors(vec![
            AgentDescriptor::new("echo", "echoes"),
            AgentDescriptor::new("broken", "always fails"),
        ]);
        Dispatcher::new(
            Arc::new(catalog),
            Arc::new(EchoHost),
            Arc::new(TaskRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_blocking_dispatch_success() {
        let dispatcher = dispatcher();
        let report = dispatcher
            .dispatch_blocking(DispatchRequest::new("echo", "hello"))
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.output.as_deref(), Some("echo::hello"));
        assert_eq!(report.handle.mode, DispatchMode::Blocking);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_data_not_err() {
        let dispatcher = dispatcher();
        let report = dispatcher
            .dispatch_blocking(DispatchRequest::new("broken", "hello"))
            .await
            .unwrap();
        assert!(!report.is_success());
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("spawn failed"));
        assert!(report.error.as_deref().unwrap().contains("transport down"));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_a_validation_error() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .dispatch_blocking(DispatchRequest::new("missing", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::AgentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_background_dispatch_registers_and_resolves() {
        let dispatcher = dispatcher();
        let handle = dispatcher
            .dispatch_background(DispatchRequest::new("echo", "bg work").for_task("1", "1.1"))
            .await
            .unwrap();
        assert_eq!(handle.mode, DispatchMode::Background);

        // Poll until the bridge applies the result.
        let registry = dispatcher.registry();
        let mut entry = registry.get(handle.id).await.unwrap();
        for _ in 0..100 {
            if entry.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            entry = registry.get(handle.id).await.unwrap();
        }
        assert_eq!(entry.status, ExecutionStatus::Completed);
        assert_eq!(entry.result.as_deref(), Some("echo::bg work"));
        assert_eq!(entry.task_ref.as_ref().unwrap().task, "1.1");
    }

    #[tokio::test]
    async fn test_memory_enrichment_is_best_effort() {
        struct BrokenMemory;

        #[async_trait]
        impl MemoryStore for BrokenMemory {
            async fn find(&self, _query: &str) -> ForemanResult<Vec<foreman_core::MemoryRecord>> {
                Err(ForemanError::Ledger("memory offline".to_string()))
            }

            async fn store(&self, _record: foreman_core::MemoryRecord) -> ForemanResult<()> {
                Ok(())
            }
        }

        let dispatcher = dispatcher().with_memory(Arc::new(BrokenMemory));
        let report = dispatcher
            .dispatch_blocking(
                DispatchRequest::new("echo", "hello").with_context(DispatchContext::new()),
            )
            .await
            .unwrap();
        // The memory outage never blocks the dispatch itself.
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_memory_records_reach_the_payload() {
        use foreman_core::{InMemoryStore, MemoryRecord};

        let memory = Arc::new(InMemoryStore::new());
        memory
            .store(MemoryRecord::new("deploys happen on fridays"))
            .await
            .unwrap();

        let dispatcher = dispatcher().with_memory(memory);
        let report = dispatcher
            .dispatch_blocking(
                DispatchRequest::new("echo", "deploys happen")
                    .with_context(DispatchContext::new()),
            )
            .await
            .unwrap();
        assert!(report
            .output
            .unwrap()
            .contains("deploys happen on fridays"));
    }
}
