/// History error types.
use std::fmt;

use thiserror::Error;

use crate::applier::ApplyError;
use crate::record::{SessionId, Seq, TransactionId};

/// Which of a session's two stacks an operation needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    Undo,
    Redo,
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undo => f.write_str("undo"),
            Self::Redo => f.write_str("redo"),
        }
    }
}

/// History errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Call is illegal in the current open-transaction or stack state.
    #[error("invalid state: {message}")]
    State { message: String },

    /// A change was rejected before being persisted.
    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    /// A requested record does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Nothing to undo or redo.
    #[error("{0} stack is empty")]
    EmptyStack(StackKind),

    /// The mutation applier failed; the reversal was rolled back.
    #[error("replay failed: {0}")]
    Apply(#[from] ApplyError),

    /// The log store failed.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl HistoryError {
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::NotFound {
            what: format!("session {session_id}"),
        }
    }

    pub fn change_not_found(session_id: SessionId, seq: Seq) -> Self {
        Self::NotFound {
            what: format!("change {seq} of session {session_id}"),
        }
    }

    pub fn transaction_not_found(session_id: SessionId, id: TransactionId) -> Self {
        Self::NotFound {
            what: format!("transaction {id} of session {session_id}"),
        }
    }
}

/// Result type for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;
