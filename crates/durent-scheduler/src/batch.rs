use std::collections::VecDeque;

use durent_types::{RequestMessage, SchedulerState};

/// Advisory cap on the number of operations consumed per iteration.
///
/// Keeps single iterations bounded so write-back and outbox flushes stay
/// small. It never splits a terminating lock request from the operations
/// admitted before it.
pub const DEFAULT_BATCH_LIMIT: usize = 100;

/// The unit of work for one scheduler iteration: zero or more operations
/// and signals, followed by at most one lock request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    pub operations: Vec<RequestMessage>,
    pub lock_request: Option<RequestMessage>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.lock_request.is_none()
    }

    /// Number of queued messages this batch consumed.
    pub fn len(&self) -> usize {
        self.operations.len() + usize::from(self.lock_request.is_some())
    }
}

/// Consume the next batch from the head of the queue.
///
/// Rules:
/// - Messages are considered strictly in queue order; messages left behind
///   keep their relative order.
/// - With no lock held, every sender is eligible.
/// - With a lock held, only the holder's messages are eligible. Foreign
///   operations and signals are skipped over and stay queued, so the holder
///   can keep driving the entity.
/// - An eligible lock request terminates the batch. From the current holder
///   this is the re-entrant case and it still terminates.
/// - A foreign lock request while a lock is held pins the queue: nothing
///   behind it is considered, eligible or not. Skipping over a blocked lock
///   request to service later holder messages would starve its sender.
/// - `limit` caps the operation count but never splits a lock request from
///   the operations preceding it.
pub fn build_batch(state: &mut SchedulerState, limit: usize) -> Batch {
    let mut batch = Batch::default();
    let mut deferred: VecDeque<RequestMessage> = VecDeque::new();

    while let Some(head) = state.queue.pop_front() {
        let foreign = state
            .locked_by
            .as_ref()
            .is_some_and(|holder| head.parent_instance_id != *holder);
        if foreign {
            let pins_queue = head.is_lock_request();
            deferred.push_back(head);
            if pins_queue {
                break;
            }
            continue;
        }
        if head.is_lock_request() {
            batch.lock_request = Some(head);
            break;
        }
        if batch.operations.len() >= limit {
            deferred.push_back(head);
            break;
        }
        batch.operations.push(head);
    }

    // Whatever was skipped goes back in front of the untouched tail.
    deferred.extend(state.queue.drain(..));
    state.queue = deferred;

    batch
}
