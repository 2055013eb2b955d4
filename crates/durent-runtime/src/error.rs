use durent_scheduler::SchedulerError;
use durent_types::DomainError;

/// Errors surfaced by the in-memory task hub and its client surface.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("scheduler instance '{scheduler_id}' is not known to the hub")]
    UnknownScheduler { scheduler_id: String },
    #[error("no response was delivered for request {request_id}")]
    NoResponse { request_id: String },
    #[error("a critical section needs at least one entity")]
    EmptyLockSet,
}
