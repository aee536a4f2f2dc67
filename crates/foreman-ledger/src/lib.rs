//! Durable Ledger for the Foreman orchestration engine.
//!
//! A file-backed state machine of Epics (bounded units of work) and their
//! Tasks that survives process restarts and lets work resume exactly where
//! it left off. Also holds the append-only Learning partitions and the
//! single-slot Handoff note.
//!
//! # Main types
//!
//! - [`Ledger`] — The workspace store: one active-Epic slot, per-Epic
//!   artifact directories, archive area, Learning logs.
//! - [`Epic`] / [`TaskRecord`] — The persisted work hierarchy.
//! - [`Learning`] — Append-only accumulated facts.
//! - [`Handoff`] — One-shot resume note for a new process.

/// Atomic file persistence primitives.
pub mod fs;
/// The Ledger store.
pub mod store;
/// Persisted data model.
pub mod types;

pub use store::Ledger;
pub use types::{
    Epic, EpicOutcome, EpicStatus, Handoff, Learning, LearningKind, LedgerIndex, TaskRecord,
    TaskStatus,
};
