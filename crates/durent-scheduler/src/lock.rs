use std::cmp::Ordering;

use durent_types::{EntityId, RequestMessage, ResponseMessage, SchedulerState};

use crate::error::ProtocolViolation;

/// Diagnostic payload of the lock-completion response, as a JSON string.
/// Callers must not parse it.
const LOCK_ACQUIRED_RESULT: &str = "\"lock set acquired\"";

/// What the scheduler must do after committing a lock request locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    /// More entities to lock: forward the advanced request to the next one.
    Forward {
        target: EntityId,
        message: RequestMessage,
    },
    /// The whole lock set is held: notify the requester once.
    Complete {
        requester: String,
        correlation_id: String,
        response: ResponseMessage,
    },
}

/// Check the ordering and routing invariants of a lock request.
///
/// The lock set must be strictly sorted by the canonical `EntityId` order
/// and free of duplicates -- that shared total order is what makes
/// overlapping lock chains deadlock-free. The position cursor must be in
/// range and must name this entity.
pub fn validate_lock_request(
    self_id: &EntityId,
    request: &RequestMessage,
) -> Result<(), ProtocolViolation> {
    for pair in request.lock_set.windows(2) {
        match pair[0].cmp(&pair[1]) {
            Ordering::Less => {}
            Ordering::Equal => {
                return Err(ProtocolViolation::LockSetDuplicate {
                    request_id: request.id.clone(),
                    entity: pair[0].clone(),
                });
            }
            Ordering::Greater => {
                return Err(ProtocolViolation::LockSetUnsorted {
                    request_id: request.id.clone(),
                });
            }
        }
    }
    let Some(expected) = request.lock_set.get(request.position) else {
        return Err(ProtocolViolation::LockPositionOutOfRange {
            request_id: request.id.clone(),
            position: request.position,
            lock_set_len: request.lock_set.len(),
        });
    };
    if expected != self_id {
        return Err(ProtocolViolation::MisroutedLock {
            request_id: request.id.clone(),
            expected: expected.clone(),
            actual: self_id.clone(),
        });
    }
    Ok(())
}

/// Advance a validated lock request past this entity.
///
/// The caller has already set `locked_by` to the requester; this only moves
/// the cursor and decides between forwarding and completing. Re-entrant
/// requests (the holder locking the same set again) take the same path and
/// end in a fresh completion response.
pub fn advance_lock_chain(request: RequestMessage) -> LockOutcome {
    let mut message = request;
    message.position += 1;
    match message.lock_set.get(message.position) {
        Some(next) => LockOutcome::Forward {
            target: next.clone(),
            message,
        },
        None => LockOutcome::Complete {
            requester: message.parent_instance_id,
            correlation_id: message.id,
            response: ResponseMessage::ok(Some(LOCK_ACQUIRED_RESULT.to_string())),
        },
    }
}

/// Apply a release message to the lock field.
///
/// Called at message ingest, before batch building, so the unlock is atomic
/// with the activation and the queue is re-scanned for newly eligible
/// messages in the same iteration. Only the current holder may release, and
/// a release never produces a response.
pub fn apply_release(
    state: &mut SchedulerState,
    request: &RequestMessage,
) -> Result<(), ProtocolViolation> {
    match &state.locked_by {
        None => Err(ProtocolViolation::ReleaseWithoutLock {
            request_id: request.id.clone(),
            sender: request.parent_instance_id.clone(),
        }),
        Some(holder) if *holder == request.parent_instance_id => {
            state.locked_by = None;
            Ok(())
        }
        Some(holder) => Err(ProtocolViolation::ReleaseFromNonHolder {
            request_id: request.id.clone(),
            sender: request.parent_instance_id.clone(),
            holder: holder.clone(),
        }),
    }
}
