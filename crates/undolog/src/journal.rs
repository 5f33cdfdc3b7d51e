/// Change journal: opens, extends and commits transactions for one session.
use std::sync::Arc;

use crate::error::{HistoryError, HistoryResult};
use crate::record::{now_nanos, Change, NewChange, SessionId, Seq, Transaction, TransactionKind};
use crate::store::{LogStore, TransactionDraft};

/// Proof that a transaction scope was opened; consumed by commit.
#[derive(Debug, PartialEq, Eq)]
pub struct TransactionHandle {
    session_id: SessionId,
    token: u64,
}

impl TransactionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

#[derive(Debug)]
struct OpenTransaction {
    token: u64,
    description: String,
    span: Option<(Seq, Seq)>,
}

/// Journal of one session's changes.
///
/// At most one transaction scope is open at a time. Every appended change
/// is persisted immediately; the transaction record is written on commit.
pub struct Journal {
    store: Arc<LogStore>,
    session_id: SessionId,
    open: Option<OpenTransaction>,
    next_token: u64,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("session_id", &self.session_id)
            .field("open", &self.open)
            .finish()
    }
}

impl Journal {
    pub fn new(store: Arc<LogStore>, session_id: SessionId) -> Self {
        Self {
            store,
            session_id,
            open: None,
            next_token: 0,
        }
    }

    /// Whether a transaction scope is currently open.
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Opens a transaction scope. Scopes do not nest.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::State` if a scope is already open.
    pub fn begin_transaction(&mut self, description: &str) -> HistoryResult<TransactionHandle> {
        if let Some(open) = &self.open {
            return Err(HistoryError::state(format!(
                "session {} already has open transaction {:?}",
                self.session_id, open.description
            )));
        }
        self.next_token += 1;
        self.open = Some(OpenTransaction {
            token: self.next_token,
            description: description.to_string(),
            span: None,
        });
        Ok(TransactionHandle {
            session_id: self.session_id,
            token: self.next_token,
        })
    }

    /// Validates and persists a change, extending the open transaction's span.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::State` if no scope is open,
    /// `HistoryError::InvariantViolation` if the change is malformed, or
    /// `HistoryError::Storage` if the write fails.
    pub fn append(&mut self, change: NewChange) -> HistoryResult<Seq> {
        let Some(open) = self.open.as_mut() else {
            return Err(HistoryError::state(format!(
                "session {} has no open transaction",
                self.session_id
            )));
        };
        change.check().map_err(HistoryError::invariant)?;

        let seq = self.store.append_change(self.session_id, change)?;
        open.span = Some(match open.span {
            Some((first, _)) => (first, seq),
            None => (seq, seq),
        });
        tracing::debug!(session = self.session_id, seq, "appended change");
        Ok(seq)
    }

    /// Closes the open scope and writes its transaction record.
    ///
    /// Returns `None` when the scope recorded no changes; such a
    /// transaction is discarded rather than committed.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::State` if no scope is open or `handle` does
    /// not belong to it.
    pub fn commit_transaction(
        &mut self,
        handle: TransactionHandle,
    ) -> HistoryResult<Option<Transaction>> {
        let open = match self.open.take() {
            Some(open) if handle.session_id == self.session_id && handle.token == open.token => {
                open
            }
            Some(open) => {
                self.open = Some(open);
                return Err(HistoryError::state(format!(
                    "handle does not match the open transaction of session {}",
                    self.session_id
                )));
            }
            None => {
                return Err(HistoryError::state(format!(
                    "session {} has no open transaction",
                    self.session_id
                )));
            }
        };

        let Some(span) = open.span else {
            tracing::debug!(
                session = self.session_id,
                "discarding empty transaction {:?}",
                open.description
            );
            return Ok(None);
        };

        let transaction = self.store.append_transaction(
            self.session_id,
            TransactionDraft {
                description: open.description,
                span: Some(span),
                timestamp: now_nanos(),
                kind: TransactionKind::Commit,
                reverts: None,
            },
        )?;
        tracing::debug!(
            session = self.session_id,
            txn = transaction.id,
            first = span.0,
            last = span.1,
            "committed transaction"
        );
        Ok(Some(transaction))
    }

    /// Reads one change of this session.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::NotFound` if no change has sequence number `seq`.
    pub fn read(&self, seq: Seq) -> HistoryResult<Change> {
        self.store
            .read_change(self.session_id, seq)?
            .ok_or_else(|| HistoryError::change_not_found(self.session_id, seq))
    }

    /// Highest sequence number assigned in this session, 0 if none.
    pub fn count(&self) -> HistoryResult<Seq> {
        Ok(self.store.last_seq(self.session_id)?)
    }
}
