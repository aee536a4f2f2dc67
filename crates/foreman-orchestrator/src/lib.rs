//! Task orchestration engine: dispatch protocol, Task Registry,
//! Supervisor, and Batch Coordinator.
//!
//! Coordinates many short-lived specialized agent executions against one
//! long-running unit of work. Blocking dispatches suspend only their
//! logical caller; background dispatches are tracked by the Registry,
//! watched by the Supervisor, and collected through the Batch Coordinator.
//! Outcomes flow back into the durable Ledger.
//!
//! # Main types
//!
//! - [`Dispatcher`] — Resolves agents, assembles payloads, runs executions.
//! - [`TaskRegistry`] — Index of outstanding asynchronous dispatches.
//! - [`Supervisor`] — Periodic staleness scan with bounded retries.
//! - [`BatchCoordinator`] — Fan-out/fan-in with partial-result semantics.
//! - [`OrchestratorConfig`] — Engine tunables with TOML loading.

/// Fan-out of independent dispatches and fan-in over the Registry.
pub mod batch;
/// Engine tunables.
pub mod config;
/// Structured dispatch context and payload assembly.
pub mod context;
/// The dispatch protocol.
pub mod dispatch;
/// The Task Registry.
pub mod registry;
/// The Supervisor reconciliation loop.
pub mod supervisor;

pub use batch::{BatchCoordinator, BatchOutcome, BatchTask, Gathered};
pub use config::OrchestratorConfig;
pub use context::{build_payload, DispatchContext};
pub use dispatch::{DispatchRequest, Dispatcher, ExecutionReport};
pub use registry::{RegistryEntry, TaskRef, TaskRegistry};
pub use supervisor::{ReconcileAction, Supervisor};
