/*
    errors.rs - Error types shared by every FReD subsystem

    Every operation reports one of four classes to its caller:
    - NotFound: keygroup, item or node is absent
    - Conflict: stale conditional write, or double admission of a replica
    - InvalidArgument: malformed keygroup/item identifier or misuse of a keygroup
    - Internal: backend or transport failure

    Callers branch on `FredError::kind()`, never on the message text.
*/

use thiserror::Error;

/// Result type for FReD operations
pub type FredResult<T> = Result<T, FredError>;

/// Coarse classification of a [`FredError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    Internal,
}

/// Errors returned by the store and replication services
#[derive(Debug, Clone, Error)]
pub enum FredError {
    /// Keygroup, item or node does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stale version or duplicate membership
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Identifier failed validation, or the operation does not apply
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Physical store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A peer could not be reached or rejected a relayed request
    #[error("Transport error talking to {node}: {reason}")]
    Transport { node: String, reason: String },

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FredError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FredError::NotFound(_) => ErrorKind::NotFound,
            FredError::Conflict(_) => ErrorKind::Conflict,
            FredError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FredError::Storage(_) | FredError::Transport { .. } | FredError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Wrap an error reported by (or on the way to) `node`.
    pub fn transport(node: impl Into<String>, reason: impl ToString) -> Self {
        FredError::Transport { node: node.into(), reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FredError::NotFound("keygroup abc".to_string());
        assert_eq!(err.to_string(), "Not found: keygroup abc");

        let err = FredError::transport("nodeB", "connection refused");
        assert_eq!(err.to_string(), "Transport error talking to nodeB: connection refused");
    }

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(FredError::NotFound(String::new()).kind(), ErrorKind::NotFound);
        assert_eq!(FredError::Conflict(String::new()).kind(), ErrorKind::Conflict);
        assert_eq!(FredError::InvalidArgument(String::new()).kind(), ErrorKind::InvalidArgument);
        assert_eq!(FredError::Storage(String::new()).kind(), ErrorKind::Internal);
        assert_eq!(FredError::transport("n", "x").kind(), ErrorKind::Internal);
        assert_eq!(FredError::Internal(String::new()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_predicates() {
        assert!(FredError::NotFound("x".into()).is_not_found());
        assert!(!FredError::NotFound("x".into()).is_conflict());
        assert!(FredError::Conflict("x".into()).is_conflict());
    }
}
