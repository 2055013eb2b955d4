pub mod entity_id;
pub mod error;
pub mod message;
pub mod state;
pub mod status;

pub use entity_id::EntityId;
pub use error::{DomainError, ErrorKind, OperationError};
pub use message::{RELEASE_OPERATION, RequestMessage, ResponseMessage};
pub use state::SchedulerState;
pub use status::{CurrentOperation, EntityStatus};
