use chrono::{DateTime, Utc};
use durent_types::{EntityId, ErrorKind, OperationError, RequestMessage};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Deterministic external-call seam.
///
/// Handlers reach activities only through this trait so the outer runtime
/// can record and replay results; the scheduler itself never performs I/O.
pub trait ActivityInvoker: Send + Sync {
    fn call_activity(
        &self,
        name: &str,
        input: Option<&str>,
    ) -> Result<Option<String>, OperationError>;
}

/// A signal buffered by a handler, waiting for the outbox flush.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PendingSignal {
    pub(crate) target: EntityId,
    pub(crate) operation: String,
    pub(crate) input: Option<String>,
}

/// Everything a finished operation wants applied to the world.
///
/// Extracted from the context after the handler returns; on handler failure
/// the dispatcher discards it wholesale and restores the pre-operation state.
#[derive(Debug)]
pub(crate) struct ContextEffects {
    pub(crate) entity_state: Option<String>,
    pub(crate) result: Option<String>,
    pub(crate) destruct: bool,
    pub(crate) signals: Vec<PendingSignal>,
}

/// The execution-time surface an operation handler sees.
///
/// The scheduler owns the persistent state; for the duration of one dispatch
/// it moves the state blob into a context, lends the context to the handler,
/// and reclaims the effects at return. Nothing here escapes the dispatch.
pub struct EntityContext<'a> {
    self_id: &'a EntityId,
    request: &'a RequestMessage,
    activation_time: DateTime<Utc>,
    is_replaying: bool,
    is_newly_constructed: bool,
    entity_state: Option<String>,
    result: Option<String>,
    destruct_requested: bool,
    signals: Vec<PendingSignal>,
    activities: Option<&'a dyn ActivityInvoker>,
}

impl<'a> EntityContext<'a> {
    pub(crate) fn new(
        self_id: &'a EntityId,
        request: &'a RequestMessage,
        is_newly_constructed: bool,
        activation_time: DateTime<Utc>,
        is_replaying: bool,
        entity_state: Option<String>,
        activities: Option<&'a dyn ActivityInvoker>,
    ) -> Self {
        Self {
            self_id,
            request,
            activation_time,
            is_replaying,
            is_newly_constructed,
            entity_state,
            result: None,
            destruct_requested: false,
            signals: Vec::new(),
            activities,
        }
    }

    /// The identity of the entity being operated on.
    pub fn self_id(&self) -> &EntityId {
        self.self_id
    }

    /// The entity key, for handlers that encode data in it.
    pub fn key(&self) -> &str {
        self.self_id.key()
    }

    /// The logical name of the operation being dispatched.
    pub fn operation_name(&self) -> &str {
        &self.request.operation
    }

    /// True while the runtime is replaying history rather than making fresh
    /// progress. Handlers must not branch business logic on this.
    pub fn is_replaying(&self) -> bool {
        self.is_replaying
    }

    /// Deterministic current time: the activation timestamp assigned by the
    /// runtime, identical under replay. Handlers needing "now" must use this
    /// instead of the system clock.
    pub fn current_time(&self) -> DateTime<Utc> {
        self.activation_time
    }

    /// True if no state existed when this operation started, either because
    /// the entity is brand new or because an earlier operation in the same
    /// batch destructed it.
    pub fn is_newly_constructed(&self) -> bool {
        self.is_newly_constructed
    }

    /// Deserialize the current entity state.
    ///
    /// The first read of a not-yet-created entity yields the type's default.
    pub fn state<T>(&self) -> Result<T, OperationError>
    where
        T: DeserializeOwned + Default,
    {
        match &self.entity_state {
            Some(blob) => {
                serde_json::from_str(blob).map_err(|e| OperationError::serialization(&e))
            }
            None => Ok(T::default()),
        }
    }

    /// Serialize `value` as the new entity state.
    pub fn set_state<T>(&mut self, value: &T) -> Result<(), OperationError>
    where
        T: Serialize + ?Sized,
    {
        let blob = serde_json::to_string(value).map_err(|e| OperationError::serialization(&e))?;
        self.entity_state = Some(blob);
        Ok(())
    }

    /// The raw serialized operation input, if any.
    pub fn raw_input(&self) -> Option<&str> {
        self.request.input.as_deref()
    }

    /// Deserialize the operation input.
    pub fn input<T>(&self) -> Result<T, OperationError>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.raw_input() else {
            return Err(OperationError::new(
                ErrorKind::Serialization,
                "SerializationError",
                format!("operation '{}' expects an input", self.request.operation),
            ));
        };
        serde_json::from_str(raw).map_err(|e| OperationError::serialization(&e))
    }

    /// Record the operation's return value. Ignored for signals.
    pub fn set_result<T>(&mut self, value: &T) -> Result<(), OperationError>
    where
        T: Serialize + ?Sized,
    {
        let blob = serde_json::to_string(value).map_err(|e| OperationError::serialization(&e))?;
        self.result = Some(blob);
        Ok(())
    }

    /// Flag this entity for deletion at the end of the operation.
    pub fn destruct_on_exit(&mut self) {
        self.destruct_requested = true;
    }

    /// Buffer a fire-and-forget signal to another entity.
    ///
    /// The signal is assigned a deterministic id and sent with the outbox
    /// flush; it is discarded if this operation fails.
    pub fn signal_entity(
        &mut self,
        target: EntityId,
        operation: impl Into<String>,
        input: Option<String>,
    ) {
        self.signals.push(PendingSignal {
            target,
            operation: operation.into(),
            input,
        });
    }

    /// Invoke an activity through the runtime's deterministic call seam.
    pub fn call_activity(
        &self,
        name: &str,
        input: Option<&str>,
    ) -> Result<Option<String>, OperationError> {
        match self.activities {
            Some(invoker) => invoker.call_activity(name, input),
            None => Err(OperationError::failed(
                "ActivityNotConfigured",
                format!("no activity invoker is configured; cannot call '{name}'"),
            )),
        }
    }

    pub(crate) fn into_effects(self) -> ContextEffects {
        ContextEffects {
            entity_state: self.entity_state,
            result: self.result,
            destruct: self.destruct_requested,
            signals: self.signals,
        }
    }
}
