pub mod error;
pub mod hub;
pub mod locks;

#[cfg(test)]
mod fixtures;

pub use error::HubError;
pub use hub::{DeliveredResponse, InMemoryHub};
pub use locks::CriticalSection;
