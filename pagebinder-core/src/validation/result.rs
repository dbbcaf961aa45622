//! Results of validation requests

use crate::document::DocumentId;
use std::fmt;

/// What happened to a `request_validation` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// A worker was started for the document
    Dispatched,
    /// A validation was already pending for the document; this request was dropped
    AlreadyPending,
    /// The coordinator is shutting down; nothing was started
    Rejected,
}

/// Terminal state of a dispatched validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The status was applied to the document
    Published(DocumentId),
    /// The document changed or went away; the result was dropped
    Discarded(DocumentId),
    /// Evaluation failed; the document status was left untouched
    Failed(DocumentId, String),
}

impl ValidationOutcome {
    pub fn document(&self) -> DocumentId {
        match self {
            ValidationOutcome::Published(id)
            | ValidationOutcome::Discarded(id)
            | ValidationOutcome::Failed(id, _) => *id,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, ValidationOutcome::Published(_))
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, ValidationOutcome::Discarded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ValidationOutcome::Failed(..))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Failed(_, error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationOutcome::Published(id) => write!(f, "{id} - published"),
            ValidationOutcome::Discarded(id) => write!(f, "{id} - discarded (stale)"),
            ValidationOutcome::Failed(id, error) => write!(f, "{id} - failed: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let failed = ValidationOutcome::Failed(DocumentId(2), "lookup offline".to_string());
        assert!(failed.is_failed());
        assert_eq!(failed.document(), DocumentId(2));
        assert_eq!(failed.error(), Some("lookup offline"));
        assert_eq!(failed.to_string(), "doc#2 - failed: lookup offline");

        let published = ValidationOutcome::Published(DocumentId(1));
        assert!(published.is_published());
        assert!(published.error().is_none());
        assert!(ValidationOutcome::Discarded(DocumentId(1)).is_discarded());
    }
}
