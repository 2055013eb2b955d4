pub mod batch;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod lock;
pub mod outbox;
pub mod registry;
pub mod scheduler;

pub use batch::{Batch, DEFAULT_BATCH_LIMIT, build_batch};
pub use context::{ActivityInvoker, EntityContext};
pub use dispatch::{BatchInvoker, WorkerBatch};
pub use error::{ProtocolViolation, SchedulerError};
pub use lock::LockOutcome;
pub use outbox::{Outbox, OutboundMessage};
pub use registry::OperationRegistry;
pub use scheduler::{
    Activation, EntityScheduler, IterationDirective, IterationOutcome, SchedulerConfig,
};
