use durent_types::{EntityId, RequestMessage, ResponseMessage};

/// A message the scheduler wants delivered once the iteration commits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Reply to a non-signal request (or a lock-set completion).
    Response {
        target_instance_id: String,
        correlation_id: String,
        response: ResponseMessage,
    },
    /// A request to another entity scheduler: an emitted signal or the next
    /// hop of a lock chain.
    Request {
        target: EntityId,
        message: RequestMessage,
    },
}

/// Per-iteration send buffer.
///
/// Messages are buffered here and flushed in one batch after state
/// composition succeeds, so a failed iteration leaves no partial sends
/// behind and replay can reconstruct the buffer without resending.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<OutboundMessage>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(
        &mut self,
        target_instance_id: impl Into<String>,
        correlation_id: impl Into<String>,
        response: ResponseMessage,
    ) {
        self.messages.push(OutboundMessage::Response {
            target_instance_id: target_instance_id.into(),
            correlation_id: correlation_id.into(),
            response,
        });
    }

    pub fn send_request(&mut self, target: EntityId, message: RequestMessage) {
        self.messages
            .push(OutboundMessage::Request { target, message });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drain the buffer for the flush.
    pub fn into_messages(self) -> Vec<OutboundMessage> {
        self.messages
    }
}
