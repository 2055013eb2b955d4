use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Leading sentinel of a scheduler instance id. It doubles as the separator
/// between the class name and the key, so class names may not contain it.
const SCHEDULER_ID_SENTINEL: char = '@';

/// Addressable identity of an entity: a class name plus an instance key.
///
/// Equality is componentwise. The derived ordering (class name first, then
/// key, both lexicographic on bytes) is the canonical total order used to
/// sort lock sets; two implementations sorting the same set must agree on
/// the result, so the order is part of the wire contract.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityId {
    class_name: String,
    key: String,
}

impl EntityId {
    /// Validated constructor.
    ///
    /// The class name must be non-empty and must not contain `@` (it would
    /// make the scheduler-id encoding ambiguous). The key must be non-empty
    /// and may contain `@`.
    pub fn new(class_name: impl Into<String>, key: impl Into<String>) -> Result<Self, DomainError> {
        let class_name = class_name.into();
        let key = key.into();
        if class_name.is_empty() {
            return Err(DomainError::EmptyClassName);
        }
        if class_name.contains(SCHEDULER_ID_SENTINEL) {
            return Err(DomainError::ClassNameContainsSeparator { class_name });
        }
        if key.is_empty() {
            return Err(DomainError::EmptyKey);
        }
        Ok(Self { class_name, key })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode this identity as the scheduler instance id used for routing
    /// within the outer workflow runtime: `@{class_name}@{key}`.
    ///
    /// The encoding round-trips through [`EntityId::from_scheduler_id`].
    pub fn scheduler_id(&self) -> String {
        format!(
            "{sep}{}{sep}{}",
            self.class_name,
            self.key,
            sep = SCHEDULER_ID_SENTINEL
        )
    }

    /// Decode a scheduler instance id back into an entity identity.
    ///
    /// Splits at the first `@` after the leading sentinel, so keys that
    /// themselves contain `@` survive the round trip.
    pub fn from_scheduler_id(raw: &str) -> Result<Self, DomainError> {
        let malformed = || DomainError::MalformedSchedulerId {
            raw: raw.to_string(),
        };
        let rest = raw.strip_prefix(SCHEDULER_ID_SENTINEL).ok_or_else(malformed)?;
        let (class_name, key) = rest.split_once(SCHEDULER_ID_SENTINEL).ok_or_else(malformed)?;
        Self::new(class_name, key).map_err(|_| malformed())
    }

    /// True if `raw` looks like a scheduler instance id (as opposed to a
    /// plain orchestration or client instance id).
    pub fn is_scheduler_id(raw: &str) -> bool {
        Self::from_scheduler_id(raw).is_ok()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class_name, self.key)
    }
}
