use std::sync::Arc;

use chrono::{DateTime, Utc};
use durent_types::{EntityId, OperationError, RequestMessage, SchedulerState};
use tracing::{debug, warn};

use crate::batch::{DEFAULT_BATCH_LIMIT, build_batch};
use crate::context::ActivityInvoker;
use crate::dispatch::{BatchInvoker, run_operations_in_process, run_operations_out_of_process};
use crate::error::SchedulerError;
use crate::lock::{LockOutcome, advance_lock_chain, apply_release, validate_lock_request};
use crate::outbox::{Outbox, OutboundMessage};
use crate::registry::OperationRegistry;

/// Per-activation facts supplied by the outer runtime.
///
/// Wall-clock time and the replay flag enter the scheduler only through
/// here, never from ambient sources, so an iteration is a pure function of
/// `(prior state, inbound messages, activation)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Activation {
    pub activation_time: DateTime<Utc>,
    pub is_replaying: bool,
}

impl Activation {
    pub fn new(activation_time: DateTime<Utc>) -> Self {
        Self {
            activation_time,
            is_replaying: false,
        }
    }

    pub fn replaying(activation_time: DateTime<Utc>) -> Self {
        Self {
            activation_time,
            is_replaying: true,
        }
    }
}

/// How the iteration ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IterationDirective {
    /// Hand this serialized state to the next activation.
    ContinueAsNew(String),
    /// The entity is latent, unlocked and has no pending work: stop the
    /// scheduler orchestration. A later message re-creates it cold.
    Terminate,
}

/// Result of one scheduler iteration.
///
/// The outbox is flushed by the runtime only after the directive commits;
/// under replay it is reconstructed but not resent.
#[derive(Debug, PartialEq, Eq)]
pub struct IterationOutcome {
    pub directive: IterationDirective,
    pub outbox: Vec<OutboundMessage>,
    /// Queued messages this iteration consumed. Zero means the iteration
    /// parked without progress and re-running it is pointless until new
    /// messages arrive.
    pub messages_processed: usize,
    /// First captured operation failure, surfaced for diagnostics. The
    /// failure itself was already delivered to the caller in a response.
    pub first_failure: Option<OperationError>,
}

#[derive(Clone)]
enum DispatchMode {
    InProcess(Arc<OperationRegistry>),
    OutOfProcess(Arc<dyn BatchInvoker>),
}

impl std::fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::InProcess(_) => f.write_str("DispatchMode::InProcess"),
            DispatchMode::OutOfProcess(_) => f.write_str("DispatchMode::OutOfProcess"),
        }
    }
}

/// Builder for an [`EntityScheduler`].
///
/// Exactly one dispatch mechanism must be configured; requesting none (or
/// both) is a fatal, non-retriable configuration error.
#[derive(Clone, Default)]
pub struct SchedulerConfig {
    registry: Option<Arc<OperationRegistry>>,
    worker: Option<Arc<dyn BatchInvoker>>,
    activities: Option<Arc<dyn ActivityInvoker>>,
    batch_limit: Option<usize>,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use in-process dispatch over the given operation table.
    pub fn registry(mut self, registry: Arc<OperationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use out-of-process dispatch through the given worker.
    pub fn worker(mut self, worker: Arc<dyn BatchInvoker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Attach the deterministic activity seam handlers may call into.
    pub fn activities(mut self, activities: Arc<dyn ActivityInvoker>) -> Self {
        self.activities = Some(activities);
        self
    }

    /// Override the advisory per-iteration operation cap.
    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    pub fn build(&self, self_id: EntityId) -> Result<EntityScheduler, SchedulerError> {
        let mode = match (&self.registry, &self.worker) {
            (Some(_), Some(_)) => {
                return Err(SchedulerError::FatalConfig {
                    reason: "both an in-process registry and an out-of-process worker are configured"
                        .to_string(),
                });
            }
            (Some(registry), None) => DispatchMode::InProcess(registry.clone()),
            (None, Some(worker)) => DispatchMode::OutOfProcess(worker.clone()),
            (None, None) => {
                return Err(SchedulerError::FatalConfig {
                    reason: "no dispatch mechanism configured: register operations or attach a worker"
                        .to_string(),
                });
            }
        };
        Ok(EntityScheduler {
            self_id,
            mode,
            activities: self.activities.clone(),
            batch_limit: self.batch_limit.unwrap_or(DEFAULT_BATCH_LIMIT),
        })
    }
}

/// The per-entity scheduler: a replayable orchestration that serializes all
/// operations on one entity.
///
/// One value of this type is cheap to rebuild per activation; all durable
/// facts live in the serialized [`SchedulerState`] threaded through
/// `ContinueAsNew`.
#[derive(Clone)]
pub struct EntityScheduler {
    self_id: EntityId,
    mode: DispatchMode,
    activities: Option<Arc<dyn ActivityInvoker>>,
    batch_limit: usize,
}

impl std::fmt::Debug for EntityScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityScheduler")
            .field("self_id", &self.self_id)
            .field("mode", &self.mode)
            .field("has_activities", &self.activities.is_some())
            .field("batch_limit", &self.batch_limit)
            .finish()
    }
}

impl EntityScheduler {
    pub fn self_id(&self) -> &EntityId {
        &self.self_id
    }

    /// Run one iteration of the scheduler loop.
    ///
    /// Rehydrates state (cold start on `None`), ingests the activation's
    /// inbound messages, builds and executes one batch, and composes the
    /// outbox and the next-state directive. The runtime flushes the outbox
    /// and performs the `ContinueAsNew` only after this returns `Ok`, so a
    /// failed iteration leaves no partial effects.
    pub fn execute_iteration(
        &self,
        prior_state: Option<&str>,
        inbound: &[RequestMessage],
        activation: &Activation,
    ) -> Result<IterationOutcome, SchedulerError> {
        let mut state = match prior_state {
            Some(blob) => SchedulerState::from_json(blob)?,
            None => SchedulerState::new(),
        };
        for message in inbound {
            // Releases are runtime-reserved control messages: they act on the
            // lock field at ingest, never enter the queue, and never get a
            // response. Queueing them could trap a release behind a blocked
            // foreign lock request.
            if message.is_release() {
                match apply_release(&mut state, message) {
                    Ok(()) => debug!(
                        entity = %self.self_id,
                        sender = %message.parent_instance_id,
                        "critical section released"
                    ),
                    Err(violation) => warn!(%violation, "dropping protocol-violating release"),
                }
                continue;
            }
            state.enqueue(message.clone());
        }

        let batch = build_batch(&mut state, self.batch_limit);
        let messages_processed = batch.len();
        debug!(
            entity = %self.self_id,
            operations = batch.operations.len(),
            lock_request = batch.lock_request.is_some(),
            queued = state.queue.len(),
            "built batch"
        );

        if batch.is_empty() {
            if !state.entity_exists && state.locked_by.is_none() && state.queue.is_empty() {
                debug!(entity = %self.self_id, "idle and latent; terminating");
                return Ok(IterationOutcome {
                    directive: IterationDirective::Terminate,
                    outbox: Vec::new(),
                    messages_processed: 0,
                    first_failure: None,
                });
            }
            // Parked: the entity exists, holds a lock, or has queued messages
            // that are currently ineligible. Wait for more deliveries.
            return Ok(IterationOutcome {
                directive: IterationDirective::ContinueAsNew(state.to_json()?),
                outbox: Vec::new(),
                messages_processed: 0,
                first_failure: None,
            });
        }

        let mut outbox = Outbox::new();
        let mut first_failure = None;
        match &self.mode {
            DispatchMode::InProcess(registry) => run_operations_in_process(
                &self.self_id,
                &mut state,
                batch.operations,
                registry.as_ref(),
                self.activities.as_deref(),
                activation.activation_time,
                activation.is_replaying,
                &mut outbox,
                &mut first_failure,
            ),
            DispatchMode::OutOfProcess(worker) => run_operations_out_of_process(
                &self.self_id,
                &mut state,
                batch.operations,
                worker.as_ref(),
                &mut outbox,
                &mut first_failure,
            ),
        }

        if let Some(request) = batch.lock_request {
            self.apply_lock_request(&mut state, request, &mut outbox);
        }

        Ok(IterationOutcome {
            directive: IterationDirective::ContinueAsNew(state.to_json()?),
            outbox: outbox.into_messages(),
            messages_processed,
            first_failure,
        })
    }

    /// Commit an admitted lock request: the lock field is written together
    /// with the rest of the state, then the chain advances.
    fn apply_lock_request(
        &self,
        state: &mut SchedulerState,
        request: RequestMessage,
        outbox: &mut Outbox,
    ) {
        if let Err(violation) = validate_lock_request(&self.self_id, &request) {
            warn!(%violation, "dropping protocol-violating lock request");
            return;
        }
        state.locked_by = Some(request.parent_instance_id.clone());
        match advance_lock_chain(request) {
            LockOutcome::Forward { target, message } => {
                debug!(entity = %self.self_id, next = %target, "lock chain advances");
                outbox.send_request(target, message);
            }
            LockOutcome::Complete {
                requester,
                correlation_id,
                response,
            } => {
                debug!(entity = %self.self_id, %requester, "lock set fully acquired");
                outbox.respond(requester, correlation_id, response);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use durent_types::{ErrorKind, ResponseMessage};
    use similar_asserts::assert_eq;

    use super::*;

    fn eid(class: &str, key: &str) -> EntityId {
        EntityId::new(class, key).unwrap()
    }

    fn counter_registry() -> Arc<OperationRegistry> {
        let mut registry = OperationRegistry::new();
        registry.register("Counter", "set", |ctx| {
            let value: i64 = ctx.input()?;
            ctx.set_state(&value)
        });
        registry.register("Counter", "increment", |ctx| {
            let current: i64 = ctx.state()?;
            ctx.set_state(&(current + 1))
        });
        registry.register("Counter", "get", |ctx| {
            let current: i64 = ctx.state()?;
            ctx.set_result(&current)
        });
        Arc::new(registry)
    }

    fn scheduler(class: &str, key: &str) -> EntityScheduler {
        SchedulerConfig::new()
            .registry(counter_registry())
            .build(eid(class, key))
            .unwrap()
    }

    fn activation() -> Activation {
        Activation::new(DateTime::UNIX_EPOCH)
    }

    #[test]
    fn cold_activation_without_messages_terminates() {
        let outcome = scheduler("Counter", "c1")
            .execute_iteration(None, &[], &activation())
            .unwrap();
        assert_eq!(outcome.directive, IterationDirective::Terminate);
        assert!(outcome.outbox.is_empty());
        assert_eq!(outcome.messages_processed, 0);
    }

    #[test]
    fn existing_entity_without_messages_parks() {
        let mut state = SchedulerState::new();
        state.entity_exists = true;
        state.entity_state = Some("1".to_string());
        let blob = state.to_json().unwrap();

        let outcome = scheduler("Counter", "c1")
            .execute_iteration(Some(&blob), &[], &activation())
            .unwrap();
        assert!(matches!(
            outcome.directive,
            IterationDirective::ContinueAsNew(_)
        ));
        assert_eq!(outcome.messages_processed, 0);
    }

    #[test]
    fn latent_entity_with_held_lock_does_not_terminate() {
        let mut state = SchedulerState::new();
        state.locked_by = Some("orch-1".to_string());
        let blob = state.to_json().unwrap();

        let outcome = scheduler("Counter", "c1")
            .execute_iteration(Some(&blob), &[], &activation())
            .unwrap();
        assert!(matches!(
            outcome.directive,
            IterationDirective::ContinueAsNew(_)
        ));
    }

    #[test]
    fn iteration_executes_operations_and_writes_state_back() {
        let inbound = vec![
            RequestMessage::operation("r1", "caller", "set", Some("5".into())),
            RequestMessage::operation("r2", "caller", "get", None),
        ];
        let outcome = scheduler("Counter", "c1")
            .execute_iteration(None, &inbound, &activation())
            .unwrap();

        assert_eq!(outcome.messages_processed, 2);
        let IterationDirective::ContinueAsNew(blob) = &outcome.directive else {
            panic!("expected continue-as-new");
        };
        let state = SchedulerState::from_json(blob).unwrap();
        assert!(state.entity_exists);
        assert_eq!(state.entity_state.as_deref(), Some("5"));
        assert!(state.queue.is_empty());

        let results: Vec<Option<&str>> = outcome
            .outbox
            .iter()
            .map(|m| match m {
                OutboundMessage::Response { response, .. } => response.result.as_deref(),
                OutboundMessage::Request { .. } => panic!("unexpected request"),
            })
            .collect();
        assert_eq!(results, vec![None, Some("5")]);
    }

    #[test]
    fn first_failure_is_surfaced_once() {
        let inbound = vec![
            RequestMessage::operation("r1", "caller", "nope", None),
            RequestMessage::operation("r2", "caller", "alsoNope", None),
        ];
        let outcome = scheduler("Counter", "c1")
            .execute_iteration(None, &inbound, &activation())
            .unwrap();

        let failure = outcome.first_failure.expect("first failure surfaced");
        assert_eq!(failure.kind, ErrorKind::UnknownOperation);
        assert!(failure.details.contains("'nope'"));
    }

    #[test]
    fn lock_request_commits_the_lock_and_forwards() {
        let lock_set = vec![eid("Counter", "a"), eid("Counter", "b")];
        let inbound = vec![RequestMessage::lock("L1", "orch-1", lock_set)];
        let outcome = scheduler("Counter", "a")
            .execute_iteration(None, &inbound, &activation())
            .unwrap();

        let IterationDirective::ContinueAsNew(blob) = &outcome.directive else {
            panic!("expected continue-as-new");
        };
        let state = SchedulerState::from_json(blob).unwrap();
        assert_eq!(state.locked_by.as_deref(), Some("orch-1"));

        assert_eq!(outcome.outbox.len(), 1);
        match &outcome.outbox[0] {
            OutboundMessage::Request { target, message } => {
                assert_eq!(*target, eid("Counter", "b"));
                assert_eq!(message.position, 1);
                assert_eq!(message.id, "L1");
            }
            other => panic!("expected forwarded lock, got {other:?}"),
        }
    }

    #[test]
    fn last_lock_in_the_chain_responds_to_the_requester() {
        let lock_set = vec![eid("Counter", "a"), eid("Counter", "b")];
        let mut request = RequestMessage::lock("L1", "orch-1", lock_set);
        request.position = 1;

        let outcome = scheduler("Counter", "b")
            .execute_iteration(None, &[request], &activation())
            .unwrap();

        assert_eq!(outcome.outbox.len(), 1);
        match &outcome.outbox[0] {
            OutboundMessage::Response {
                target_instance_id,
                correlation_id,
                response,
            } => {
                assert_eq!(target_instance_id, "orch-1");
                assert_eq!(correlation_id, "L1");
                assert!(!response.is_error());
            }
            other => panic!("expected completion response, got {other:?}"),
        }
    }

    #[test]
    fn violating_lock_request_is_dropped_without_effects() {
        // Unsorted set: b before a.
        let lock_set = vec![eid("Counter", "b"), eid("Counter", "a")];
        let inbound = vec![RequestMessage::lock("L1", "orch-1", lock_set)];
        let outcome = scheduler("Counter", "b")
            .execute_iteration(None, &inbound, &activation())
            .unwrap();

        let IterationDirective::ContinueAsNew(blob) = &outcome.directive else {
            panic!("expected continue-as-new");
        };
        let state = SchedulerState::from_json(blob).unwrap();
        assert_eq!(state.locked_by, None);
        assert!(outcome.outbox.is_empty());
    }

    #[test]
    fn foreign_operations_stay_queued_while_locked() {
        let mut state = SchedulerState::new();
        state.entity_exists = true;
        state.entity_state = Some("1".to_string());
        state.locked_by = Some("orch-1".to_string());
        let blob = state.to_json().unwrap();

        let inbound = vec![RequestMessage::operation("r1", "intruder", "get", None)];
        let outcome = scheduler("Counter", "c1")
            .execute_iteration(Some(&blob), &inbound, &activation())
            .unwrap();

        assert!(outcome.outbox.is_empty());
        assert_eq!(outcome.messages_processed, 0);
        let IterationDirective::ContinueAsNew(next) = &outcome.directive else {
            panic!("expected continue-as-new");
        };
        let state = SchedulerState::from_json(next).unwrap();
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.locked_by.as_deref(), Some("orch-1"));
    }

    #[test]
    fn replaying_an_iteration_is_byte_identical() {
        let mut state = SchedulerState::new();
        state.entity_exists = true;
        state.entity_state = Some("41".to_string());
        let blob = state.to_json().unwrap();

        let inbound = vec![
            RequestMessage::operation("r1", "caller", "increment", None),
            RequestMessage::signal("r2", "caller", "increment", None),
            RequestMessage::operation("r3", "caller", "get", None),
        ];
        let sched = scheduler("Counter", "c1");

        let first = sched
            .execute_iteration(Some(&blob), &inbound, &activation())
            .unwrap();
        let replay = sched
            .execute_iteration(Some(&blob), &inbound, &Activation::replaying(DateTime::UNIX_EPOCH))
            .unwrap();

        assert_eq!(first, replay);
        let IterationDirective::ContinueAsNew(a) = &first.directive else {
            panic!("expected continue-as-new");
        };
        let IterationDirective::ContinueAsNew(b) = &replay.directive else {
            panic!("expected continue-as-new");
        };
        assert_eq!(a, b);
    }

    #[test_log::test]
    fn release_at_ingest_unblocks_foreign_traffic_in_the_same_iteration() {
        let mut state = SchedulerState::new();
        state.locked_by = Some("orch-1".to_string());
        state.enqueue(RequestMessage::operation("r1", "stranger", "increment", None));
        let blob = state.to_json().unwrap();

        let inbound = vec![RequestMessage::release("rel", "orch-1")];
        let outcome = scheduler("Counter", "c1")
            .execute_iteration(Some(&blob), &inbound, &activation())
            .unwrap();

        // The release cleared the lock before batch building, so the queued
        // stranger operation ran immediately.
        assert_eq!(outcome.messages_processed, 1);
        let IterationDirective::ContinueAsNew(next) = &outcome.directive else {
            panic!("expected continue-as-new");
        };
        let state = SchedulerState::from_json(next).unwrap();
        assert_eq!(state.locked_by, None);
        assert_eq!(state.entity_state.as_deref(), Some("1"));
        assert!(state.queue.is_empty());
        // No response for the release itself, one for the operation.
        assert_eq!(outcome.outbox.len(), 1);
    }

    #[test]
    fn release_from_a_non_holder_is_dropped() {
        let mut state = SchedulerState::new();
        state.locked_by = Some("orch-1".to_string());
        let blob = state.to_json().unwrap();

        let inbound = vec![RequestMessage::release("rel", "orch-2")];
        let outcome = scheduler("Counter", "c1")
            .execute_iteration(Some(&blob), &inbound, &activation())
            .unwrap();

        let IterationDirective::ContinueAsNew(next) = &outcome.directive else {
            panic!("expected continue-as-new");
        };
        let state = SchedulerState::from_json(next).unwrap();
        assert_eq!(state.locked_by.as_deref(), Some("orch-1"));
        assert!(outcome.outbox.is_empty());
    }

    #[test]
    fn release_on_a_latent_idle_entity_lets_it_terminate() {
        let mut state = SchedulerState::new();
        state.locked_by = Some("orch-1".to_string());
        let blob = state.to_json().unwrap();

        let inbound = vec![RequestMessage::release("rel", "orch-1")];
        let outcome = scheduler("Counter", "c1")
            .execute_iteration(Some(&blob), &inbound, &activation())
            .unwrap();

        assert_eq!(outcome.directive, IterationDirective::Terminate);
    }

    #[test]
    fn building_without_any_dispatch_mechanism_is_fatal() {
        let err = SchedulerConfig::new().build(eid("Counter", "c1")).unwrap_err();
        assert!(matches!(err, SchedulerError::FatalConfig { .. }));
    }

    #[test]
    fn responses_preserve_delivery_order_across_iterations() {
        let inbound: Vec<RequestMessage> = (0..5)
            .map(|i| {
                RequestMessage::operation(format!("r{i}"), "caller", "increment", None)
            })
            .collect();

        // Force multiple iterations with a tiny batch limit.
        let sched = SchedulerConfig::new()
            .registry(counter_registry())
            .batch_limit(2)
            .build(eid("Counter", "c1"))
            .unwrap();

        let mut prior: Option<String> = None;
        let mut order: Vec<String> = Vec::new();
        let mut pending: Vec<RequestMessage> = inbound;
        loop {
            let outcome = sched
                .execute_iteration(prior.as_deref(), &pending, &activation())
                .unwrap();
            pending = Vec::new();
            for m in &outcome.outbox {
                if let OutboundMessage::Response { correlation_id, .. } = m {
                    order.push(correlation_id.clone());
                }
            }
            match outcome.directive {
                IterationDirective::ContinueAsNew(blob) => {
                    if outcome.messages_processed == 0 {
                        break;
                    }
                    prior = Some(blob);
                }
                IterationDirective::Terminate => break,
            }
        }
        assert_eq!(order, vec!["r0", "r1", "r2", "r3", "r4"]);
    }

    #[test]
    fn signal_requests_produce_no_response_messages() {
        let inbound = vec![RequestMessage::signal("s1", "caller", "increment", None)];
        let outcome = scheduler("Counter", "c1")
            .execute_iteration(None, &inbound, &activation())
            .unwrap();

        assert!(
            !outcome
                .outbox
                .iter()
                .any(|m| matches!(m, OutboundMessage::Response { .. })),
            "signals must not be answered"
        );
    }

    #[test]
    fn lock_completion_response_is_ok_shaped() {
        let request = RequestMessage::lock("L1", "orch-1", vec![eid("Counter", "a")]);
        let outcome = scheduler("Counter", "a")
            .execute_iteration(None, &[request], &activation())
            .unwrap();
        match &outcome.outbox[0] {
            OutboundMessage::Response { response, .. } => {
                assert_eq!(response.error_kind, None);
                assert_ne!(*response, ResponseMessage::default());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }
}
