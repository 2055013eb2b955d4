use crate::entity_id::EntityId;
use crate::error::{ErrorKind, OperationError};
use serde::{Deserialize, Serialize};

/// Operation name reserved by the runtime for releasing a held critical
/// section. A message carrying it is never forwarded to user code and never
/// produces a response.
pub const RELEASE_OPERATION: &str = "__release";

/// Operation name stamped on lock-chain requests. Diagnostic only: a message
/// is a lock request iff its `lock_set` is non-empty, regardless of name.
pub const ACQUIRE_OPERATION: &str = "__acquire";

/// A message delivered to an entity scheduler: an operation, a signal, or a
/// lock request.
///
/// `lock_set` and `position` are only meaningful for lock requests; plain
/// operations leave them at their defaults and the wire encoding omits them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    /// Globally unique request identifier; the correlation id of the reply.
    pub id: String,
    /// Instance id of the orchestration or client proxy that issued the
    /// request; the reply target for non-signals.
    pub parent_instance_id: String,
    /// Logical operation name.
    pub operation: String,
    /// Opaque serialized argument payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Fire-and-forget flag. Signals never receive a response.
    #[serde(default)]
    pub is_signal: bool,
    /// Ordered entities to lock; empty for plain operations and signals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lock_set: Vec<EntityId>,
    /// Zero-based cursor into `lock_set` naming the entity this hop targets.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub position: usize,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl RequestMessage {
    /// A request/response operation.
    pub fn operation(
        id: impl Into<String>,
        parent_instance_id: impl Into<String>,
        operation: impl Into<String>,
        input: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_instance_id: parent_instance_id.into(),
            operation: operation.into(),
            input,
            is_signal: false,
            lock_set: Vec::new(),
            position: 0,
        }
    }

    /// A fire-and-forget signal.
    pub fn signal(
        id: impl Into<String>,
        parent_instance_id: impl Into<String>,
        operation: impl Into<String>,
        input: Option<String>,
    ) -> Self {
        Self {
            is_signal: true,
            ..Self::operation(id, parent_instance_id, operation, input)
        }
    }

    /// The first hop of a lock-chain request over `lock_set`.
    ///
    /// The caller is responsible for sorting and deduplicating the set; the
    /// receiving scheduler validates and drops violating requests.
    pub fn lock(
        id: impl Into<String>,
        parent_instance_id: impl Into<String>,
        lock_set: Vec<EntityId>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_instance_id: parent_instance_id.into(),
            operation: ACQUIRE_OPERATION.to_string(),
            input: None,
            is_signal: false,
            lock_set,
            position: 0,
        }
    }

    /// A critical-section release from `parent_instance_id`, one per locked
    /// entity. Modeled as a signal: no response is ever delivered for it.
    pub fn release(id: impl Into<String>, parent_instance_id: impl Into<String>) -> Self {
        Self::signal(id, parent_instance_id, RELEASE_OPERATION, None)
    }

    /// A message is a lock request iff it carries a non-empty lock set.
    pub fn is_lock_request(&self) -> bool {
        !self.lock_set.is_empty()
    }

    /// True for the runtime-reserved release message.
    pub fn is_release(&self) -> bool {
        !self.is_lock_request() && self.operation == RELEASE_OPERATION
    }

    /// Derive a deterministic child id for the `seq`-th message this request
    /// causes to be sent (for example a signal emitted by its handler).
    ///
    /// Replay re-derives the same ids, so no fresh randomness is needed
    /// inside the scheduler.
    pub fn child_id(&self, seq: usize) -> String {
        format!("{}:{}", self.id, seq)
    }
}

/// The reply to a non-signal request. Exactly one of `result` or the
/// exception pair is meaningful.
///
/// `error_kind` is a schema addition with default `None`; decoders that
/// predate it ignore it, and old payloads without it still decode.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ResponseMessage {
    /// A successful response. `result` is the serialized return value, or
    /// `None` when the operation returned nothing.
    pub fn ok(result: Option<String>) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    /// A failure response carrying the captured operation error.
    pub fn error(err: &OperationError) -> Self {
        Self {
            result: None,
            exception_type: Some(err.exception_type.clone()),
            exception_details: Some(err.details.clone()),
            error_kind: Some(err.kind.clone()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.exception_type.is_some()
    }
}
