use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An indexed column set on one client table, with optional covering columns.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ConcreteIndex {
    pub table_name: String,
    pub indexed: Vec<String>,
    #[serde(default)]
    pub included: Vec<String>,
}

impl ConcreteIndex {
    pub fn new(table_name: impl Into<String>, indexed: Vec<String>) -> Self {
        Self {
            table_name: table_name.into(),
            indexed,
            included: Vec::new(),
        }
    }

    pub fn including(mut self, included: Vec<String>) -> Self {
        self.included = included;
        self
    }

    /// True when an index on `self` already serves lookups on `other`:
    /// same table, `other.indexed` is a prefix of `self.indexed`, and every
    /// column `other` wants covered is present somewhere in `self`.
    pub fn covers(&self, other: &ConcreteIndex) -> bool {
        if self.table_name != other.table_name || other.indexed.len() > self.indexed.len() {
            return false;
        }
        if self.indexed[..other.indexed.len()] != other.indexed[..] {
            return false;
        }
        other.included.iter().all(|column| {
            self.indexed.contains(column) || self.included.contains(column)
        })
    }
}

/// Catalog state of one physical index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum IndexState {
    Valid,
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalIndex {
    pub name: String,
    pub index: ConcreteIndex,
    pub state: IndexState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexJobStatus {
    Queued,
    Running,
    Succeeded,
    Failed(String),
    TimedOut,
}

impl IndexJobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            IndexJobStatus::Succeeded | IndexJobStatus::Failed(_) | IndexJobStatus::TimedOut
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexJobSummary {
    pub job_id: Uuid,
    pub schema: String,
    pub indexes: Vec<ConcreteIndex>,
    pub status: IndexJobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
