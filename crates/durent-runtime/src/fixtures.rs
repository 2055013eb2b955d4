//! Shared sample entities for the hub test suites.

use std::sync::Arc;

use durent_scheduler::{OperationRegistry, SchedulerConfig};
use durent_types::{EntityId, OperationError};

use crate::hub::InMemoryHub;

pub(crate) fn eid(class: &str, key: &str) -> EntityId {
    EntityId::new(class, key).unwrap()
}

fn register_counter(registry: &mut OperationRegistry) {
    registry.register("Counter", "set", |ctx| {
        let value: i64 = ctx.input()?;
        ctx.set_state(&value)
    });
    registry.register("Counter", "add", |ctx| {
        let current: i64 = ctx.state()?;
        let delta: i64 = ctx.input()?;
        ctx.set_state(&(current + delta))
    });
    registry.register("Counter", "increment", |ctx| {
        let current: i64 = ctx.state()?;
        ctx.set_state(&(current + 1))
    });
    registry.register("Counter", "get", |ctx| {
        let current: i64 = ctx.state()?;
        ctx.set_result(&current)
    });
}

fn register_string_store(registry: &mut OperationRegistry) {
    registry.register("StringStore", "set", |ctx| {
        let value: String = ctx.input()?;
        ctx.set_state(&value)
    });
    registry.register("StringStore", "get", |ctx| {
        if ctx.is_newly_constructed() {
            return Err(OperationError::failed(
                "InvalidOperationException",
                "must not call get on a non-existing actor",
            ));
        }
        let value: String = ctx.state()?;
        ctx.set_result(&value)
    });
    registry.register("StringStore", "delete", |ctx| {
        ctx.destruct_on_exit();
        Ok(())
    });
}

pub(crate) fn sample_registry() -> Arc<OperationRegistry> {
    let mut registry = OperationRegistry::new();
    register_counter(&mut registry);
    register_string_store(&mut registry);
    Arc::new(registry)
}

pub(crate) fn counter_hub() -> InMemoryHub {
    InMemoryHub::new(SchedulerConfig::new().registry(sample_registry()))
}

/// A hub whose `Relay` class fans increments out to `(Counter, "right")`.
pub(crate) fn relay_hub() -> InMemoryHub {
    let mut registry = OperationRegistry::new();
    register_counter(&mut registry);
    registry.register("Relay", "forward", |ctx| {
        let count: i64 = ctx.input()?;
        let target = EntityId::new("Counter", "right")
            .map_err(|e| OperationError::failed("InvalidEntityId", e.to_string()))?;
        for _ in 0..count {
            ctx.signal_entity(target.clone(), "increment", None);
        }
        Ok(())
    });
    InMemoryHub::new(SchedulerConfig::new().registry(Arc::new(registry)))
}
