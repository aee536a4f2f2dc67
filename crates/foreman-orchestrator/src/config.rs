use foreman_core::{ForemanError, ForemanResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Milliseconds without a heartbeat before an entry counts as stale.
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    /// Bounded retries per entry before permanent failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between Supervisor reconciliation scans.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Milliseconds between Registry polls while gathering.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Seconds a terminal Registry entry is retained before GC.
    #[serde(default = "default_entry_retention_secs")]
    pub entry_retention_secs: u64,
    /// Maximum Tasks per Epic.
    #[serde(default = "default_max_tasks_per_epic")]
    pub max_tasks_per_epic: usize,
}

fn default_stale_threshold_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_scan_interval_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_entry_retention_secs() -> u64 {
    300
}

fn default_max_tasks_per_epic() -> usize {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stale_threshold_ms: default_stale_threshold_ms(),
            max_retries: default_max_retries(),
            scan_interval_secs: default_scan_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            entry_retention_secs: default_entry_retention_secs(),
            max_tasks_per_epic: default_max_tasks_per_epic(),
        }
    }
}

impl OrchestratorConfig {
    /// Parses a config from TOML, applying field defaults for anything
    /// omitted.
    pub fn from_toml_str(content: &str) -> ForemanResult<Self> {
        toml::from_str(content)
            .map_err(|e| ForemanError::Config(format!("invalid orchestrator config: {e}")))
    }

    /// The stale threshold as a duration.
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }

    /// The scan interval as a duration.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// The gather poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The terminal-entry retention window as a duration.
    pub fn entry_retention(&self) -> Duration {
        Duration::from_secs(self.entry_retention_secs)
    }
}
