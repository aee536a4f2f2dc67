use crate::agent::AgentDescriptor;
use crate::ForemanResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Liveness signal emitted by a host adapter while an execution runs.
///
/// Sends are lossless and non-blocking; a dropped receiver makes further
/// beats silent no-ops, so adapters may keep ticking after the caller
/// stopped listening.
#[derive(Debug, Clone)]
pub struct HeartbeatSender {
    tx: mpsc::UnboundedSender<Option<String>>,
}

impl HeartbeatSender {
    /// Reports liveness with no note.
    pub fn beat(&self) {
        let _ = self.tx.send(None);
    }

    /// Reports liveness with a short progress note.
    pub fn beat_with(&self, note: impl Into<String>) {
        let _ = self.tx.send(Some(note.into()));
    }
}

/// Creates a heartbeat channel: the sender goes to the host adapter, the
/// receiver to whoever records liveness (the Registry bridge).
pub fn heartbeat_channel() -> (HeartbeatSender, mpsc::UnboundedReceiver<Option<String>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HeartbeatSender { tx }, rx)
}

/// The runtime that actually executes an agent's reasoning loop.
///
/// The engine only sees this trait; the real host lives behind an adapter.
/// Adapters are responsible for mapping the host's raw
/// success/failure/transport-error trichotomy into `Ok`/`Err` here. In
/// particular, a host whose response-parsing path reports an error even
/// though the work succeeded upstream must resolve that quirk *inside the
/// adapter* and return `Ok`; the engine's error taxonomy never
/// special-cases host messages.
#[async_trait]
pub trait ExecutionHost: Send + Sync {
    /// Runs one agent execution to completion and returns its raw output.
    ///
    /// Adapters should tick `pulse` whenever the execution demonstrates
    /// progress (streamed chunks, tool round-trips); executions that never
    /// tick are treated as stale by the Supervisor once the threshold
    /// elapses.
    async fn execute(
        &self,
        agent: &AgentDescriptor,
        payload: &str,
        pulse: HeartbeatSender,
    ) -> ForemanResult<String>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heartbeat_channel_delivers_notes() {
        let (pulse, mut rx) = heartbeat_channel();
        pulse.beat();
        pulse.beat_with("halfway");
        assert_eq!(rx.recv().await.unwrap(), None);
        assert_eq!(rx.recv().await.unwrap(), Some("halfway".to_string()));
    }

    #[tokio::test]
    async fn test_beat_after_receiver_dropped_is_silent() {
        let (pulse, rx) = heartbeat_channel();
        drop(rx);
        pulse.beat();
        pulse.beat_with("late");
    }
}
