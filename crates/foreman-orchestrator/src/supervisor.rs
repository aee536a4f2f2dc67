use crate::config::OrchestratorConfig;
use crate::dispatch::spawn_execution;
use crate::registry::{TaskRef, TaskRegistry};
use chrono::Utc;
use foreman_core::{AgentCatalog, ExecutionHost};
use foreman_ledger::Ledger;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// What the Supervisor did to one stale entry during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// The entry was re-dispatched with its retained payload.
    Retried {
        /// The entry id.
        entry: Uuid,
        /// 1-based retry attempt.
        attempt: u32,
    },
    /// Retries were exhausted; the entry was marked failed.
    Exhausted {
        /// The entry id.
        entry: Uuid,
    },
}

/// Background reconciliation loop over the Task Registry.
///
/// Detects entries whose heartbeat has gone stale and retries them a
/// bounded number of times before marking permanent failure and
/// propagating it to the owning Ledger Task. Staleness is treated as a
/// recoverable condition, the same as a transport error.
pub struct Supervisor {
    catalog: Arc<AgentCatalog>,
    host: Arc<dyn ExecutionHost>,
    registry: Arc<TaskRegistry>,
    ledger: Option<Arc<Ledger>>,
    config: OrchestratorConfig,
}

impl Supervisor {
    /// Creates a supervisor over the registry.
    pub fn new(
        catalog: Arc<AgentCatalog>,
        host: Arc<dyn ExecutionHost>,
        registry: Arc<TaskRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            catalog,
            host,
            registry,
            ledger: None,
            config,
        }
    }

    /// Attaches the Ledger so terminal failures reach the owning Task.
    pub fn with_ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// One reconciliation pass over all non-terminal entries.
    ///
    /// Each entry is evaluated independently and in no particular order;
    /// one stuck entry never blocks the rest. Healthy entries produce no
    /// output at all; only outstanding-failure events are surfaced.
    pub async fn reconcile_once(&self) -> Vec<ReconcileAction> {
        let now = Utc::now();
        let mut actions = Vec::new();

        for entry in self.registry.outstanding().await {
            if entry.since_heartbeat(now) <= self.config.stale_threshold() {
                continue;
            }

            if entry.retries < self.config.max_retries {
                let Some(snapshot) = self.registry.prepare_retry(entry.id).await else {
                    // Resolved between the scan and now; nothing to do.
                    continue;
                };
                match self.catalog.resolve(&snapshot.agent) {
                    Ok(descriptor) => {
                        warn!(
                            entry = %entry.id,
                            agent = %snapshot.agent,
                            attempt = snapshot.retries,
                            max = self.config.max_retries,
                            "stale entry, re-dispatching"
                        );
                        spawn_execution(
                            Arc::clone(&self.host),
                            descriptor.clone(),
                            snapshot.payload.clone(),
                            Arc::clone(&self.registry),
                            entry.id,
                        );
                        actions.push(ReconcileAction::Retried {
                            entry: entry.id,
                            attempt: snapshot.retries,
                        });
                    }
                    Err(e) => {
                        self.fail_entry(entry.id, entry.task_ref.as_ref(), &e.to_string())
                            .await;
                        actions.push(ReconcileAction::Exhausted { entry: entry.id });
                    }
                }
            } else {
                self.fail_entry(entry.id, entry.task_ref.as_ref(), "stale, retries exhausted")
                    .await;
                actions.push(ReconcileAction::Exhausted { entry: entry.id });
            }
        }

        actions
    }

    async fn fail_entry(&self, entry_id: Uuid, task_ref: Option<&TaskRef>, reason: &str) {
        error!(entry = %entry_id, reason = %reason, "marking entry failed");
        self.registry.fail(entry_id, reason).await;

        let (Some(ledger), Some(task_ref)) = (&self.ledger, task_ref) else {
            return;
        };
        // Ledger propagation is best effort: a scan never aborts because
        // one entry's Task could not be updated.
        match ledger.active_epic().await {
            Ok(Some(epic)) if epic.id == task_ref.epic => {
                if let Err(e) = ledger.fail_task(&task_ref.task, reason).await {
                    warn!(task = %task_ref.task, error = %e, "failed to propagate entry failure to ledger");
                }
            }
            Ok(_) => {
                warn!(
                    epic = %task_ref.epic,
                    task = %task_ref.task,
                    "owning epic is no longer active; failure not propagated"
                );
            }
            Err(e) => {
                warn!(error = %e, "ledger unavailable while propagating entry failure");
            }
        }
    }

    /// Starts the periodic scan as an independent background unit.
    ///
    /// Returns the [`JoinHandle`] so the caller can abort it on shutdown.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.config.scan_interval()).await;
                self.reconcile_once().await;
                let pruned = self.registry.prune(self.config.entry_retention()).await;
                if pruned > 0 {
                    debug!(pruned, "pruned retained registry entries");
                }
            }
        })
    }
}
