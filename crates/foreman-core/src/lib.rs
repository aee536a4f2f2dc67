//! Core types and error definitions for the Foreman orchestration engine.
//!
//! This crate provides the foundational types shared across all Foreman
//! crates: the unified error enum, the agent catalog, execution handles,
//! the multi-turn dialogue state machine, and the traits behind which the
//! external collaborators (execution host, long-term memory) live.
//!
//! # Main types
//!
//! - [`ForemanError`] — Unified error enum for all Foreman subsystems.
//! - [`ForemanResult`] — Convenience alias for `Result<T, ForemanError>`.
//! - [`AgentCatalog`] — Read-only registry of dispatchable agent descriptors.
//! - [`ExecutionHandle`] — Reference to one invocation of an agent.
//! - [`Dialogue`] — Finite-state machine for multi-turn exchanges.
//! - [`ExecutionHost`] — Trait the real agent runtime is adapted behind.
//! - [`MemoryStore`] — Trait for the long-term memory collaborator.

/// Agent descriptors and the startup-built catalog.
pub mod agent;
/// Multi-turn dialogue state machine.
pub mod dialogue;
/// Execution handles and dispatch modes.
pub mod handle;
/// The execution-host boundary trait and heartbeat plumbing.
pub mod host;
/// The long-term memory boundary trait.
pub mod memory;

pub use agent::{AgentCatalog, AgentDescriptor, ModelParams};
pub use dialogue::{Dialogue, DialogueState};
pub use handle::{DispatchMode, ExecutionHandle, ExecutionStatus};
pub use host::{ExecutionHost, HeartbeatSender, heartbeat_channel};
pub use memory::{InMemoryStore, MemoryRecord, MemoryStore};

/// Top-level error type for the Foreman engine.
///
/// Validation failures carry enough structured detail for the caller to
/// self-correct; they are returned through the API boundary, never thrown
/// past it.
#[derive(Debug, thiserror::Error)]
pub enum ForemanError {
    /// The requested agent does not exist in the catalog. Carries the other
    /// agents registered under the same namespace so the caller can recover.
    #[error("agent '{name}' not found (known agents in namespace: {siblings:?})")]
    AgentNotFound {
        /// The name that failed to resolve.
        name: String,
        /// Catalog entries sharing the namespace of `name`.
        siblings: Vec<String>,
    },

    /// An Epic is already occupying the single active slot.
    #[error("epic '{active}' is already active; archive it before creating another")]
    EpicAlreadyActive {
        /// Id of the Epic currently in the active slot.
        active: String,
    },

    /// An operation that requires an active Epic found the slot empty.
    #[error("no active epic")]
    NoActiveEpic,

    /// A Task was moved to `running` while a dependency was not `completed`.
    #[error("task '{task}' cannot run: dependency '{dependency}' is not completed")]
    DependencyUnmet {
        /// The Task that attempted the transition.
        task: String,
        /// The dependency that is not yet completed.
        dependency: String,
    },

    /// The Epic already holds the maximum number of Tasks.
    #[error("epic already holds the maximum of {limit} tasks")]
    TaskLimitExceeded {
        /// The configured per-Epic Task bound.
        limit: usize,
    },

    /// The execution host failed to spawn or transport the execution.
    /// Surfaced as result data on the dispatch path, never panicked.
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    /// An illegal dialogue-state transition was attempted.
    #[error("dialogue error: {0}")]
    Dialogue(String),

    /// An error from the persistent Ledger.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// An error from the Task Registry.
    #[error("registry error: {0}")]
    Registry(String),

    /// An error from the Batch Coordinator.
    #[error("batch error: {0}")]
    Batch(String),

    /// An error in configuration parsing or validation.
    #[error("config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ForemanError`].
pub type ForemanResult<T> = Result<T, ForemanError>;
