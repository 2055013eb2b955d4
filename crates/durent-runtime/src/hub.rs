use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration};
use durent_scheduler::{
    Activation, IterationDirective, OutboundMessage, SchedulerConfig,
};
use durent_types::{EntityId, EntityStatus, RequestMessage, ResponseMessage, SchedulerState};
use tracing::debug;
use uuid::Uuid;

use crate::error::HubError;

/// A response the hub routed back to a client or orchestration, kept in
/// arrival order for inspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveredResponse {
    pub target_instance_id: String,
    pub correlation_id: String,
    pub response: ResponseMessage,
}

/// Persistence and delivery cell for one entity scheduler.
#[derive(Debug, Default)]
struct SchedulerCell {
    /// The `ContinueAsNew` blob, or `None` when the orchestration is not
    /// running (never started, or terminated).
    persisted: Option<String>,
    inbox: VecDeque<RequestMessage>,
    /// Set when the last activation made progress and the persisted queue
    /// may hold further eligible messages.
    ready: bool,
}

/// Deterministic in-memory task hub: the reference implementation of the
/// runtime seam the entity scheduler runs on.
///
/// One activation delivers a cell's entire inbox as the known inbound count,
/// runs one scheduler iteration, commits the resulting state and flushes the
/// outbox into the other cells. Entities are activated in scheduler-id order
/// and time advances one tick per activation, so a run over the same inputs
/// replays identically.
pub struct InMemoryHub {
    config: SchedulerConfig,
    cells: BTreeMap<String, SchedulerCell>,
    responses: HashMap<String, ResponseMessage>,
    response_log: Vec<DeliveredResponse>,
    activations: i64,
}

impl InMemoryHub {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            cells: BTreeMap::new(),
            responses: HashMap::new(),
            response_log: Vec::new(),
            activations: 0,
        }
    }

    /// Enqueue a message for an entity without running the pump.
    pub fn send(&mut self, target: &EntityId, message: RequestMessage) {
        self.cells
            .entry(target.scheduler_id())
            .or_default()
            .inbox
            .push_back(message);
    }

    /// Fire-and-forget client signal. The pump runs so the effect is
    /// observable, but no response ever exists for it.
    pub fn signal_entity(
        &mut self,
        target: &EntityId,
        operation: &str,
        input: Option<String>,
    ) -> Result<(), HubError> {
        let message = RequestMessage::signal(
            Uuid::new_v4().to_string(),
            "client",
            operation,
            input,
        );
        self.send(target, message);
        self.run_until_quiescent()
    }

    /// Request/response client call.
    pub fn call_entity(
        &mut self,
        target: &EntityId,
        operation: &str,
        input: Option<String>,
    ) -> Result<ResponseMessage, HubError> {
        let request_id = Uuid::new_v4().to_string();
        let client = format!("client-{}", Uuid::new_v4());
        self.send(
            target,
            RequestMessage::operation(request_id.clone(), client, operation, input),
        );
        self.run_until_quiescent()?;
        self.responses
            .remove(&request_id)
            .ok_or(HubError::NoResponse { request_id })
    }

    /// The bounded diagnostic snapshot for one entity.
    ///
    /// Served from the persisted blob; an entity that never ran or whose
    /// scheduler terminated reports the latent defaults.
    pub fn read_entity_status(&self, target: &EntityId) -> Result<EntityStatus, HubError> {
        match self.persisted_blob(target) {
            Some(blob) => {
                let state = SchedulerState::from_json(blob)
                    .map_err(durent_scheduler::SchedulerError::from)?;
                Ok(EntityStatus::capture(&state, None))
            }
            None => Ok(EntityStatus::default()),
        }
    }

    /// Decode the full persisted scheduler state, for tests and deep
    /// diagnostics. `None` when the scheduler is not running.
    pub fn scheduler_state(&self, target: &EntityId) -> Result<Option<SchedulerState>, HubError> {
        match self.persisted_blob(target) {
            Some(blob) => Ok(Some(
                SchedulerState::from_json(blob)
                    .map_err(durent_scheduler::SchedulerError::from)?,
            )),
            None => Ok(None),
        }
    }

    /// Every response routed so far, in delivery order.
    pub fn response_log(&self) -> &[DeliveredResponse] {
        &self.response_log
    }

    /// Claim the response for a request id, if one has been delivered.
    pub(crate) fn take_response(&mut self, request_id: &str) -> Option<ResponseMessage> {
        self.responses.remove(request_id)
    }

    /// Activate entities until no cell has pending deliveries or progress.
    pub fn run_until_quiescent(&mut self) -> Result<(), HubError> {
        loop {
            let next = self
                .cells
                .iter()
                .find(|(_, cell)| !cell.inbox.is_empty() || cell.ready)
                .map(|(id, _)| id.clone());
            let Some(scheduler_id) = next else {
                return Ok(());
            };
            self.activate(&scheduler_id)?;
        }
    }

    fn persisted_blob(&self, target: &EntityId) -> Option<&String> {
        self.cells
            .get(&target.scheduler_id())
            .and_then(|cell| cell.persisted.as_ref())
    }

    fn activate(&mut self, scheduler_id: &str) -> Result<(), HubError> {
        let entity_id = EntityId::from_scheduler_id(scheduler_id)?;
        let (prior, inbound) = {
            let cell =
                self.cells
                    .get_mut(scheduler_id)
                    .ok_or_else(|| HubError::UnknownScheduler {
                        scheduler_id: scheduler_id.to_string(),
                    })?;
            cell.ready = false;
            (cell.persisted.clone(), cell.inbox.drain(..).collect::<Vec<_>>())
        };

        let activation = Activation::new(self.next_activation_time());
        let scheduler = self.config.build(entity_id)?;
        let outcome = scheduler.execute_iteration(prior.as_deref(), &inbound, &activation)?;
        debug!(
            scheduler = scheduler_id,
            delivered = inbound.len(),
            processed = outcome.messages_processed,
            outbox = outcome.outbox.len(),
            "activation complete"
        );

        {
            let cell =
                self.cells
                    .get_mut(scheduler_id)
                    .ok_or_else(|| HubError::UnknownScheduler {
                        scheduler_id: scheduler_id.to_string(),
                    })?;
            match outcome.directive {
                IterationDirective::ContinueAsNew(blob) => {
                    cell.persisted = Some(blob);
                    cell.ready = outcome.messages_processed > 0;
                }
                IterationDirective::Terminate => {
                    cell.persisted = None;
                    cell.ready = false;
                }
            }
        }

        for message in outcome.outbox {
            match message {
                OutboundMessage::Response {
                    target_instance_id,
                    correlation_id,
                    response,
                } => {
                    self.responses
                        .insert(correlation_id.clone(), response.clone());
                    self.response_log.push(DeliveredResponse {
                        target_instance_id,
                        correlation_id,
                        response,
                    });
                }
                OutboundMessage::Request { target, message } => {
                    self.send(&target, message);
                }
            }
        }
        Ok(())
    }

    /// Deterministic clock: one tick per activation from the epoch.
    fn next_activation_time(&mut self) -> DateTime<chrono::Utc> {
        let time = DateTime::UNIX_EPOCH + Duration::seconds(self.activations);
        self.activations += 1;
        time
    }
}
