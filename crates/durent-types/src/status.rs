use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::SchedulerState;

/// The operation an entity is executing right now, if any.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentOperation {
    pub operation: String,
    pub id: String,
    pub parent_instance_id: String,
    pub start_time: DateTime<Utc>,
}

/// Compact diagnostic snapshot of one entity scheduler.
///
/// Bounded by construction: it carries counts and ids, never `entity_state`
/// or queued payloads, so its size is O(1) regardless of workload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStatus {
    pub entity_exists: bool,
    pub queue_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_operation: Option<CurrentOperation>,
}

impl EntityStatus {
    /// Snapshot a persisted scheduler state. `current` is populated only
    /// while an operation is actually in flight.
    pub fn capture(state: &SchedulerState, current: Option<CurrentOperation>) -> Self {
        Self {
            entity_exists: state.entity_exists,
            queue_size: state.queue.len(),
            locked_by: state.locked_by.clone(),
            current_operation: current,
        }
    }
}
