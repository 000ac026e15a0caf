//! Serializable views of queue state for management surfaces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Strategy;

/// Point-in-time view of the whole upload queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Global concurrency cap
    pub max_slots: usize,
    /// Active uploads across all groups
    pub used_slots: usize,
    /// Groups in scheduling order
    pub groups: Vec<GroupSnapshot>,
    /// Tracked uploads in enqueue order
    pub uploads: Vec<UploadSnapshot>,
}

/// Accounting for one scheduling group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub name: String,
    pub priority: u32,
    pub slots: usize,
    pub used_slots: usize,
    pub strategy: Strategy,
}

/// One tracked upload and its lifecycle stamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSnapshot {
    pub username: String,
    pub filename: String,
    pub enqueued_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub pinned_group: Option<String>,
}
