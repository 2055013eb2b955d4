use durent_types::{EntityId, RequestMessage};
use uuid::Uuid;

use crate::error::HubError;
use crate::hub::InMemoryHub;

/// A held distributed critical section.
///
/// Obtained from [`InMemoryHub::acquire_locks`]; consumed by
/// [`InMemoryHub::release_locks`], so a section cannot be released twice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CriticalSection {
    owner: String,
    lock_set: Vec<EntityId>,
}

impl CriticalSection {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The locked entities in canonical order.
    pub fn lock_set(&self) -> &[EntityId] {
        &self.lock_set
    }
}

impl InMemoryHub {
    /// Acquire a critical section over `entities` on behalf of `owner`.
    ///
    /// The set is sorted into the canonical `EntityId` order and
    /// deduplicated, then a single lock request chains through it. All
    /// overlapping acquisitions traverse shared entities in that same order,
    /// which is what rules out deadlock. Blocks until the completion
    /// response arrives.
    pub fn acquire_locks(
        &mut self,
        owner: &str,
        entities: &[EntityId],
    ) -> Result<CriticalSection, HubError> {
        let mut lock_set = entities.to_vec();
        lock_set.sort();
        lock_set.dedup();
        let Some(first) = lock_set.first().cloned() else {
            return Err(HubError::EmptyLockSet);
        };

        let request_id = Uuid::new_v4().to_string();
        self.send(
            &first,
            RequestMessage::lock(request_id.clone(), owner, lock_set.clone()),
        );
        self.run_until_quiescent()?;
        // The completion payload is diagnostic only; arrival is what counts.
        self.take_response(&request_id)
            .ok_or(HubError::NoResponse { request_id })?;

        Ok(CriticalSection {
            owner: owner.to_string(),
            lock_set,
        })
    }

    /// Release a held critical section: one release message per member, sent
    /// after the owner's protected work committed. Releases never receive
    /// responses.
    pub fn release_locks(&mut self, section: CriticalSection) -> Result<(), HubError> {
        for entity in section.lock_set() {
            let message = RequestMessage::release(Uuid::new_v4().to_string(), section.owner());
            self.send(entity, message);
        }
        self.run_until_quiescent()
    }
}
