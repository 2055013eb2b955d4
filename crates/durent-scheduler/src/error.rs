use durent_types::EntityId;

/// Describes a message that violated the scheduler's protocol.
///
/// Violating messages are logged and dropped; they never crash the scheduler
/// and never mutate entity state. Each variant carries enough context to
/// reconstruct what was dropped and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The lock set of a lock request is not strictly sorted by the
    /// canonical `EntityId` order.
    LockSetUnsorted { request_id: String },
    /// The lock set of a lock request contains the same entity twice.
    LockSetDuplicate {
        request_id: String,
        entity: EntityId,
    },
    /// The lock request's position cursor does not name a lock-set member.
    LockPositionOutOfRange {
        request_id: String,
        position: usize,
        lock_set_len: usize,
    },
    /// The lock request arrived at an entity other than the one its cursor
    /// names. Routing sanity check.
    MisroutedLock {
        request_id: String,
        expected: EntityId,
        actual: EntityId,
    },
    /// A release arrived while no lock was held.
    ReleaseWithoutLock { request_id: String, sender: String },
    /// A release arrived from an instance other than the current holder.
    ReleaseFromNonHolder {
        request_id: String,
        sender: String,
        holder: String,
    },
}

impl std::fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockSetUnsorted { request_id } => {
                write!(f, "lock request {request_id}: lock set is not sorted")
            }
            Self::LockSetDuplicate { request_id, entity } => {
                write!(f, "lock request {request_id}: duplicate entity {entity}")
            }
            Self::LockPositionOutOfRange {
                request_id,
                position,
                lock_set_len,
            } => write!(
                f,
                "lock request {request_id}: position {position} out of range for lock set of {lock_set_len}"
            ),
            Self::MisroutedLock {
                request_id,
                expected,
                actual,
            } => write!(
                f,
                "lock request {request_id}: routed to {actual} but cursor names {expected}"
            ),
            Self::ReleaseWithoutLock { request_id, sender } => {
                write!(f, "release {request_id} from {sender} while no lock is held")
            }
            Self::ReleaseFromNonHolder {
                request_id,
                sender,
                holder,
            } => write!(
                f,
                "release {request_id} from {sender} but the lock is held by {holder}"
            ),
        }
    }
}

/// Errors that abort a scheduler iteration.
///
/// These propagate to the outer runtime, which retries the iteration from
/// the last persisted state. Per-operation failures are not here: they are
/// captured into `ResponseMessage`s and the batch continues.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler state (de)serialization failed: {0}")]
    StateCodec(#[from] serde_json::Error),
    #[error("fatal scheduler configuration: {reason}")]
    FatalConfig { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_display_names_the_request() {
        let v = ProtocolViolation::LockPositionOutOfRange {
            request_id: "r1".to_string(),
            position: 3,
            lock_set_len: 2,
        };
        let text = v.to_string();
        assert!(text.contains("r1"));
        assert!(text.contains("position 3"));
    }

    #[test]
    fn misrouted_lock_display_names_both_entities() {
        let v = ProtocolViolation::MisroutedLock {
            request_id: "r2".to_string(),
            expected: EntityId::new("C", "a").unwrap(),
            actual: EntityId::new("C", "b").unwrap(),
        };
        let text = v.to_string();
        assert!(text.contains("C@a"));
        assert!(text.contains("C@b"));
    }
}
