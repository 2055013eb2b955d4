use std::collections::VecDeque;

use crate::message::RequestMessage;
use serde::{Deserialize, Serialize};

/// Per-entity state persisted between scheduler iterations.
///
/// This is the sole iteration-to-iteration carrier: everything the next
/// activation needs is in here, serialized as a JSON object. Schema evolution
/// happens by adding optional fields with serde defaults.
///
/// Invariants:
/// - `entity_state` is `Some` iff `entity_exists` is true.
/// - `locked_by` is `Some` only between a committed lock request and its
///   matching release.
/// - `queue` preserves arrival order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    #[serde(default)]
    pub entity_exists: bool,
    /// Opaque user state, JSON-encoded. `None` iff the entity does not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_state: Option<String>,
    /// Pending requests in arrival order.
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub queue: VecDeque<RequestMessage>,
    /// Instance id holding the critical section on this entity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
}

impl SchedulerState {
    /// Cold-start state: non-existent entity, empty queue, no lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `entity_exists` and `entity_state` agree.
    pub fn is_coherent(&self) -> bool {
        self.entity_exists == self.entity_state.is_some()
    }

    /// Append an inbound message to the tail of the queue.
    pub fn enqueue(&mut self, message: RequestMessage) {
        self.queue.push_back(message);
    }

    /// Serialize for the `ContinueAsNew` handoff.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Rehydrate from a `ContinueAsNew` blob.
    pub fn from_json(blob: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }
}
