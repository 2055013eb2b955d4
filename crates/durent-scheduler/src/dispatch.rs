use chrono::{DateTime, Utc};
use durent_types::{
    EntityId, ErrorKind, OperationError, RequestMessage, ResponseMessage, SchedulerState,
};
use serde::Deserialize;
use tracing::warn;

use crate::context::{ActivityInvoker, EntityContext};
use crate::outbox::Outbox;
use crate::registry::OperationRegistry;

/// Execute the operations of one batch in-process, one handler invocation
/// per operation.
///
/// Failures are captured per-request and never stop the batch. Responses for
/// non-signals are buffered in request order, which is what gives callers
/// FIFO response ordering per entity.
pub(crate) fn run_operations_in_process(
    self_id: &EntityId,
    state: &mut SchedulerState,
    operations: Vec<RequestMessage>,
    registry: &OperationRegistry,
    activities: Option<&dyn ActivityInvoker>,
    activation_time: DateTime<Utc>,
    is_replaying: bool,
    outbox: &mut Outbox,
    first_failure: &mut Option<OperationError>,
) {
    for request in operations {
        match dispatch_one(
            self_id,
            state,
            &request,
            registry,
            activities,
            activation_time,
            is_replaying,
            outbox,
        ) {
            Ok(result) => {
                if !request.is_signal {
                    outbox.respond(
                        &request.parent_instance_id,
                        &request.id,
                        ResponseMessage::ok(result),
                    );
                }
            }
            Err(error) => {
                record_failure(&request, &error, first_failure);
                if !request.is_signal {
                    outbox.respond(
                        &request.parent_instance_id,
                        &request.id,
                        ResponseMessage::error(&error),
                    );
                }
            }
        }
    }
}

/// Dispatch a single operation against the entity.
///
/// The entity counts as existing from the moment its operation starts, so
/// the handler observes `is_newly_constructed` only for the first touch. If
/// the handler fails, the pre-operation `(exists, state)` pair is restored:
/// a failed operation leaves no trace, which keeps state and existence
/// coherent at every iteration boundary.
fn dispatch_one(
    self_id: &EntityId,
    state: &mut SchedulerState,
    request: &RequestMessage,
    registry: &OperationRegistry,
    activities: Option<&dyn ActivityInvoker>,
    activation_time: DateTime<Utc>,
    is_replaying: bool,
    outbox: &mut Outbox,
) -> Result<Option<String>, OperationError> {
    let handler = registry
        .resolve(self_id.class_name(), &request.operation)
        .ok_or_else(|| {
            OperationError::unknown_operation(self_id.class_name(), &request.operation)
        })?;

    let prior_exists = state.entity_exists;
    let prior_state = state.entity_state.clone();
    let is_newly_constructed = !prior_exists;

    let mut context = EntityContext::new(
        self_id,
        request,
        is_newly_constructed,
        activation_time,
        is_replaying,
        state.entity_state.take(),
        activities,
    );
    let invoked = handler(&mut context);
    let effects = context.into_effects();

    match invoked {
        Ok(()) => {
            if effects.destruct {
                state.entity_exists = false;
                state.entity_state = None;
            } else {
                state.entity_state = effects.entity_state;
                state.entity_exists = state.entity_state.is_some();
            }
            for (seq, signal) in effects.signals.into_iter().enumerate() {
                let message = RequestMessage::signal(
                    request.child_id(seq),
                    self_id.scheduler_id(),
                    signal.operation,
                    signal.input,
                );
                outbox.send_request(signal.target, message);
            }
            Ok(effects.result)
        }
        Err(error) => {
            state.entity_exists = prior_exists;
            state.entity_state = prior_state;
            Err(error)
        }
    }
}

fn record_failure(
    request: &RequestMessage,
    error: &OperationError,
    first_failure: &mut Option<OperationError>,
) {
    warn!(
        request_id = %request.id,
        operation = %request.operation,
        %error,
        "entity operation failed"
    );
    if first_failure.is_none() {
        *first_failure = Some(error.clone());
    }
}

/// The view of a batch handed to an out-of-process worker.
#[derive(Clone, Debug)]
pub struct WorkerBatch<'a> {
    pub entity_id: &'a EntityId,
    pub entity_exists: bool,
    pub entity_state: Option<&'a str>,
    pub operations: &'a [RequestMessage],
}

/// Out-of-process dispatch seam: one invocation per batch.
///
/// The worker returns a raw JSON document; transport failures and non-JSON
/// output are both reported through the `Err` side and fail the whole batch.
pub trait BatchInvoker: Send + Sync {
    fn invoke(&self, batch: WorkerBatch<'_>) -> Result<String, OperationError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerResult {
    entity_exists: bool,
    #[serde(default)]
    entity_state: Option<String>,
    #[serde(default)]
    responses: Vec<WorkerResponse>,
    #[serde(default)]
    signals: Vec<WorkerSignal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerSignal {
    target: EntityId,
    name: String,
    #[serde(default)]
    input: Option<String>,
}

/// Execute the operations of one batch through an out-of-process worker.
///
/// A worker reply that fails to parse is a fatal per-batch error: every
/// non-signal request fails and state is untouched.
pub(crate) fn run_operations_out_of_process(
    self_id: &EntityId,
    state: &mut SchedulerState,
    operations: Vec<RequestMessage>,
    worker: &dyn BatchInvoker,
    outbox: &mut Outbox,
    first_failure: &mut Option<OperationError>,
) {
    let work = operations;
    if work.is_empty() {
        return;
    }

    let parsed = worker
        .invoke(WorkerBatch {
            entity_id: self_id,
            entity_exists: state.entity_exists,
            entity_state: state.entity_state.as_deref(),
            operations: &work,
        })
        .and_then(|raw| {
            serde_json::from_str::<WorkerResult>(&raw).map_err(|e| {
                OperationError::new(
                    ErrorKind::Serialization,
                    "WorkerOutputError",
                    format!("worker returned non-JSON output: {e}"),
                )
            })
        });

    match parsed {
        Ok(result) => apply_worker_result(self_id, state, &work, result, outbox, first_failure),
        Err(error) => {
            warn!(entity = %self_id, %error, "out-of-process batch failed");
            if first_failure.is_none() {
                *first_failure = Some(error.clone());
            }
            for request in &work {
                if !request.is_signal {
                    outbox.respond(
                        &request.parent_instance_id,
                        &request.id,
                        ResponseMessage::error(&error),
                    );
                }
            }
        }
    }
}

fn apply_worker_result(
    self_id: &EntityId,
    state: &mut SchedulerState,
    work: &[RequestMessage],
    result: WorkerResult,
    outbox: &mut Outbox,
    first_failure: &mut Option<OperationError>,
) {
    if result.entity_exists && result.entity_state.is_none() {
        warn!(entity = %self_id, "worker reported an existing entity without state; treating as non-existent");
        state.entity_exists = false;
        state.entity_state = None;
    } else {
        state.entity_exists = result.entity_exists;
        state.entity_state = if result.entity_exists {
            result.entity_state
        } else {
            None
        };
    }

    let non_signals: Vec<&RequestMessage> = work.iter().filter(|r| !r.is_signal).collect();
    if result.responses.len() != non_signals.len() {
        warn!(
            entity = %self_id,
            expected = non_signals.len(),
            got = result.responses.len(),
            "worker response count does not match the non-signal requests"
        );
    }
    for (idx, request) in non_signals.iter().enumerate() {
        match result.responses.get(idx) {
            Some(reply) if reply.is_error => {
                let error = OperationError::failed(
                    "OperationError",
                    reply.result.clone().unwrap_or_default(),
                );
                record_failure(request, &error, first_failure);
                outbox.respond(
                    &request.parent_instance_id,
                    &request.id,
                    ResponseMessage::error(&error),
                );
            }
            Some(reply) => {
                outbox.respond(
                    &request.parent_instance_id,
                    &request.id,
                    ResponseMessage::ok(reply.result.clone()),
                );
            }
            None => {
                let error = OperationError::new(
                    ErrorKind::Protocol,
                    "WorkerOutputError",
                    "worker returned no response for this operation",
                );
                record_failure(request, &error, first_failure);
                outbox.respond(
                    &request.parent_instance_id,
                    &request.id,
                    ResponseMessage::error(&error),
                );
            }
        }
    }

    // Worker signals become fresh requests with ids derived from the batch
    // head, so replay re-derives the same ids.
    if let Some(origin) = work.first() {
        for (seq, signal) in result.signals.into_iter().enumerate() {
            let message = RequestMessage::signal(
                origin.child_id(seq),
                self_id.scheduler_id(),
                signal.name,
                signal.input,
            );
            outbox.send_request(signal.target, message);
        }
    }
}
