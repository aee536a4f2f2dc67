use crate::ForemanResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A single record in long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// Free-text content.
    pub text: String,
    /// UTC timestamp of creation.
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Creates a record with a fresh id and timestamp.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// The long-term memory collaborator.
///
/// Consumed only to populate dispatch context before an execution and to
/// receive Learnings after an Epic archives. There is no synchronous
/// dependency on it: callers log failures and move on, they never block
/// orchestration on memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Returns records relevant to the query.
    async fn find(&self, query: &str) -> ForemanResult<Vec<MemoryRecord>>;

    /// Stores a record.
    async fn store(&self, record: MemoryRecord) -> ForemanResult<()>;
}

/// Brute-force in-memory store using substring matching.
/// Suitable for tests and embedders; real deployments adapt their own store.
pub struct InMemoryStore {
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored records.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn find(&self, query: &str) -> ForemanResult<Vec<MemoryRecord>> {
        let query = query.to_lowercase();
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.text.to_lowercase().contains(&query))
            .cloned()
            .collect())
    }

    async fn store(&self, record: MemoryRecord) -> ForemanResult<()> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }
}
