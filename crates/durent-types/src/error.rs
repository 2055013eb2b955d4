use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced by the identity and state data types themselves.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("entity class name must not be empty")]
    EmptyClassName,
    #[error("entity class name '{class_name}' must not contain '@'")]
    ClassNameContainsSeparator { class_name: String },
    #[error("entity key must not be empty")]
    EmptyKey,
    #[error("'{raw}' is not a scheduler instance id")]
    MalformedSchedulerId { raw: String },
}

/// Stable category for an operation failure.
///
/// This is the machine-readable classification carried on the wire next to
/// the free-form exception type name. It is intentionally coarse-grained:
/// callers use it for policy decisions, the strings are for humans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The user operation handler returned an error.
    OperationFailed,
    /// The requested operation name is not registered for the entity class.
    UnknownOperation,
    /// Inbound input or outbound result could not be (de)serialized.
    Serialization,
    /// The operation required an existing entity and found none.
    MissingEntity,
    /// The message violated the scheduler's message protocol.
    Protocol,
}

/// Failure of a single entity operation, captured at the dispatch boundary.
///
/// `exception_type` keeps a source-compatible free-form type name for
/// diagnostics; `kind` is the stable classification. Neither stops the batch
/// the operation was part of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationError {
    pub kind: ErrorKind,
    pub exception_type: String,
    pub details: String,
}

impl OperationError {
    pub fn new(
        kind: ErrorKind,
        exception_type: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            exception_type: exception_type.into(),
            details: details.into(),
        }
    }

    /// A failure raised by the user operation handler itself.
    pub fn failed(exception_type: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationFailed, exception_type, details)
    }

    /// The operation name is not registered for the entity class.
    pub fn unknown_operation(class_name: &str, operation: &str) -> Self {
        Self::new(
            ErrorKind::UnknownOperation,
            "UnknownOperation",
            format!("no such operation '{operation}' on entity class '{class_name}'"),
        )
    }

    /// A payload failed to (de)serialize on the way in or out of a handler.
    pub fn serialization(source: &serde_json::Error) -> Self {
        Self::new(
            ErrorKind::Serialization,
            "SerializationError",
            source.to_string(),
        )
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exception_type, self.details)
    }
}

impl std::error::Error for OperationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_operation_names_the_class_and_operation() {
        let err = OperationError::unknown_operation("Counter", "frobnicate");
        assert_eq!(err.kind, ErrorKind::UnknownOperation);
        assert!(err.details.contains("no such operation 'frobnicate'"));
        assert!(err.details.contains("'Counter'"));
    }

    #[test]
    fn display_is_type_then_details() {
        let err = OperationError::failed("InvalidOperationException", "boom");
        assert_eq!(err.to_string(), "InvalidOperationException: boom");
    }

    #[test]
    fn serialization_errors_carry_the_stable_kind() {
        let json_err = serde_json::from_str::<i64>("not json").unwrap_err();
        let err = OperationError::serialization(&json_err);
        assert_eq!(err.kind, ErrorKind::Serialization);
        assert_eq!(err.exception_type, "SerializationError");
    }
}
