/// Undo/redo engine over the persistent change journal.
///
/// Each session has its own journal and pair of undo/redo stacks holding
/// transaction ids. Reverting a transaction reads its changes back from the
/// log store, replays their snapshots through the `MutationApplier` inside
/// one applier transaction, appends an audit transaction and then delivers
/// reduced notifications. Sessions not yet held in memory are restored by
/// replaying their transaction log.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::applier::{MutationApplier, NotificationSink};
use crate::config::HistoryConfig;
use crate::cursor::Cursor;
use crate::error::{HistoryError, HistoryResult, StackKind};
use crate::journal::{Journal, TransactionHandle};
use crate::record::{
    now_nanos, Change, ChangeTarget, NewChange, Session, SessionId, Seq, Transaction,
    TransactionId, TransactionKind,
};
use crate::signals::{Notification, SignalTable};
use crate::store::{LogStore, TransactionDraft};

const UNDO_PREFIX: &str = "Undo: ";
const REDO_PREFIX: &str = "Redo: ";

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Undo and redo stacks of one session. Top of stack is the last element.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct UndoStacks {
    undo: Vec<TransactionId>,
    redo: Vec<TransactionId>,
}

impl UndoStacks {
    /// Rebuilds the stacks by replaying a session's transaction log.
    fn rebuild(session_id: SessionId, transactions: &[Transaction]) -> Self {
        let mut stacks = Self::default();
        for txn in transactions {
            match (txn.kind, txn.reverts) {
                (TransactionKind::Commit, _) if txn.span.is_some() => stacks.push_commit(txn.id),
                (TransactionKind::Commit, _) => {}
                (TransactionKind::Undo, Some(id)) if stacks.top(StackKind::Undo) == Some(id) => {
                    stacks.transfer(StackKind::Undo);
                }
                (TransactionKind::Redo, Some(id)) if stacks.top(StackKind::Redo) == Some(id) => {
                    stacks.transfer(StackKind::Redo);
                }
                (kind, reverts) => {
                    tracing::warn!(
                        session = session_id,
                        txn = txn.id,
                        "audit record {kind:?} of {reverts:?} does not match stack top, ignoring"
                    );
                }
            }
        }
        stacks
    }

    fn push_commit(&mut self, id: TransactionId) {
        self.undo.push(id);
        self.redo.clear();
    }

    fn stack(&self, kind: StackKind) -> &Vec<TransactionId> {
        match kind {
            StackKind::Undo => &self.undo,
            StackKind::Redo => &self.redo,
        }
    }

    fn top(&self, kind: StackKind) -> Option<TransactionId> {
        self.stack(kind).last().copied()
    }

    /// Moves the top of `from` onto the other stack.
    fn transfer(&mut self, from: StackKind) {
        let (src, dst) = match from {
            StackKind::Undo => (&mut self.undo, &mut self.redo),
            StackKind::Redo => (&mut self.redo, &mut self.undo),
        };
        if let Some(id) = src.pop() {
            dst.push(id);
        }
    }
}

/// In-memory state of one session.
#[derive(Debug)]
struct SessionHistory {
    journal: Journal,
    stacks: UndoStacks,
}

/// Outcome of a successful undo or redo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reversal {
    /// The committed transaction that was reverted or re-applied.
    pub transaction: Transaction,
    /// Audit record appended for this reversal.
    pub audit: Transaction,
    /// Notifications delivered to the sink, in emission order.
    pub notifications: Vec<Notification>,
}

/// One transaction of a session's history together with its changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub transaction: Transaction,
    pub changes: Vec<Change>,
}

/// Manages journals and undo/redo stacks for every session of a log store.
pub struct UndoEngine {
    store: Arc<LogStore>,
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<SessionHistory>>>>,
    applier: Mutex<Box<dyn MutationApplier>>,
    sink: Box<dyn NotificationSink>,
}

impl std::fmt::Debug for UndoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoEngine")
            .field("loaded_sessions", &lock(&self.sessions).len())
            .finish()
    }
}

impl UndoEngine {
    pub fn new(
        store: Arc<LogStore>,
        applier: impl MutationApplier + 'static,
        sink: impl NotificationSink + 'static,
    ) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            applier: Mutex::new(Box::new(applier)),
            sink: Box::new(sink),
        }
    }

    /// Opens the log database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Storage` if the database cannot be opened.
    pub fn open(
        config: &HistoryConfig,
        applier: impl MutationApplier + 'static,
        sink: impl NotificationSink + 'static,
    ) -> HistoryResult<Self> {
        let store = LogStore::open(&config.database_path())?;
        Ok(Self::new(store, applier, sink))
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Creates a new session with empty history.
    pub fn create_session(&self, owner: Option<&str>, tree: Option<&str>) -> HistoryResult<Session> {
        let session = self.store.create_session(owner, tree)?;
        let history = SessionHistory {
            journal: Journal::new(Arc::clone(&self.store), session.id),
            stacks: UndoStacks::default(),
        };
        lock(&self.sessions).insert(session.id, Arc::new(Mutex::new(history)));
        tracing::info!(session = session.id, owner = ?session.owner, "created session");
        Ok(session)
    }

    /// Lists every session stored in the log.
    pub fn sessions(&self) -> HistoryResult<Vec<Session>> {
        Ok(self.store.sessions()?)
    }

    /// Returns the in-memory state of a session, restoring it from the log
    /// store on first use.
    fn session(&self, session_id: SessionId) -> HistoryResult<Arc<Mutex<SessionHistory>>> {
        let mut sessions = lock(&self.sessions);
        if let Some(history) = sessions.get(&session_id) {
            return Ok(Arc::clone(history));
        }

        if self.store.session(session_id)?.is_none() {
            return Err(HistoryError::session_not_found(session_id));
        }
        let transactions = self.store.transactions(session_id)?;
        let stacks = UndoStacks::rebuild(session_id, &transactions);
        tracing::info!(
            session = session_id,
            undo = stacks.undo.len(),
            redo = stacks.redo.len(),
            "restored session history"
        );
        let history = Arc::new(Mutex::new(SessionHistory {
            journal: Journal::new(Arc::clone(&self.store), session_id),
            stacks,
        }));
        sessions.insert(session_id, Arc::clone(&history));
        Ok(history)
    }

    /// Opens a transaction scope on a session.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::State` if the session already has one open.
    pub fn begin_transaction(
        &self,
        session_id: SessionId,
        description: &str,
    ) -> HistoryResult<TransactionHandle> {
        let session = self.session(session_id)?;
        let mut history = lock(&session);
        history.journal.begin_transaction(description)
    }

    /// Journals one change into the session's open transaction.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::State` if no transaction is open and
    /// `HistoryError::InvariantViolation` if the change is malformed.
    pub fn append(&self, session_id: SessionId, change: NewChange) -> HistoryResult<Seq> {
        let session = self.session(session_id)?;
        let mut history = lock(&session);
        history.journal.append(change)
    }

    /// Commits the open transaction, making it the next undo step and
    /// invalidating everything on the redo stack.
    ///
    /// Returns `None` if the transaction recorded no changes.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::State` if no matching transaction is open.
    pub fn commit_transaction(
        &self,
        handle: TransactionHandle,
    ) -> HistoryResult<Option<Transaction>> {
        let session = self.session(handle.session_id())?;
        let mut history = lock(&session);
        let committed = history.journal.commit_transaction(handle)?;
        if let Some(txn) = &committed {
            history.stacks.push_commit(txn.id);
        }
        Ok(committed)
    }

    /// Reads one change of a session.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::NotFound` if the change does not exist.
    pub fn read(&self, session_id: SessionId, seq: Seq) -> HistoryResult<Change> {
        let session = self.session(session_id)?;
        let history = lock(&session);
        history.journal.read(seq)
    }

    /// Highest sequence number assigned in a session, 0 if none.
    pub fn count(&self, session_id: SessionId) -> HistoryResult<Seq> {
        let session = self.session(session_id)?;
        let history = lock(&session);
        history.journal.count()
    }

    /// Returns a cursor over the session's stored changes.
    pub fn cursor(&self, session_id: SessionId) -> HistoryResult<Cursor> {
        if self.store.session(session_id)?.is_none() {
            return Err(HistoryError::session_not_found(session_id));
        }
        Ok(Cursor::new(Arc::clone(&self.store), session_id))
    }

    pub fn can_undo(&self, session_id: SessionId) -> HistoryResult<bool> {
        Ok(self.top(session_id, StackKind::Undo)?.is_some())
    }

    pub fn can_redo(&self, session_id: SessionId) -> HistoryResult<bool> {
        Ok(self.top(session_id, StackKind::Redo)?.is_some())
    }

    /// Label of the next undo step, e.g. `Undo: Add person`.
    pub fn undo_label(&self, session_id: SessionId) -> HistoryResult<Option<String>> {
        self.label(session_id, StackKind::Undo)
    }

    /// Label of the next redo step, e.g. `Redo: Add person`.
    pub fn redo_label(&self, session_id: SessionId) -> HistoryResult<Option<String>> {
        self.label(session_id, StackKind::Redo)
    }

    fn top(&self, session_id: SessionId, kind: StackKind) -> HistoryResult<Option<TransactionId>> {
        let session = self.session(session_id)?;
        let history = lock(&session);
        Ok(history.stacks.top(kind))
    }

    fn label(&self, session_id: SessionId, kind: StackKind) -> HistoryResult<Option<String>> {
        let Some(id) = self.top(session_id, kind)? else {
            return Ok(None);
        };
        let txn = self.transaction(session_id, id)?;
        let prefix = match kind {
            StackKind::Undo => UNDO_PREFIX,
            StackKind::Redo => REDO_PREFIX,
        };
        Ok(Some(format!("{prefix}{}", txn.description)))
    }

    fn transaction(&self, session_id: SessionId, id: TransactionId) -> HistoryResult<Transaction> {
        self.store
            .read_transaction(session_id, id)?
            .ok_or_else(|| HistoryError::transaction_not_found(session_id, id))
    }

    /// Every transaction record of a session, in id order, with its changes.
    ///
    /// Snapshots are stripped unless `include_snapshots` is set.
    pub fn history(
        &self,
        session_id: SessionId,
        include_snapshots: bool,
    ) -> HistoryResult<Vec<HistoryEntry>> {
        if self.store.session(session_id)?.is_none() {
            return Err(HistoryError::session_not_found(session_id));
        }
        self.store
            .transactions(session_id)?
            .into_iter()
            .map(|transaction| -> HistoryResult<HistoryEntry> {
                let changes = transaction
                    .seqs()
                    .map(|seq| -> HistoryResult<Change> {
                        let change = self
                            .store
                            .read_change(session_id, seq)?
                            .ok_or_else(|| HistoryError::change_not_found(session_id, seq))?;
                        Ok(if include_snapshots {
                            change
                        } else {
                            change.without_snapshots()
                        })
                    })
                    .collect::<HistoryResult<Vec<_>>>()?;
                Ok(HistoryEntry {
                    transaction,
                    changes,
                })
            })
            .collect()
    }

    /// Reverts the most recent committed transaction of a session.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::EmptyStack` if there is nothing to undo,
    /// `HistoryError::Apply` if the applier failed, or
    /// `HistoryError::Storage` if the audit record could not be written. In
    /// every case the stacks are left unchanged and no notification is
    /// delivered.
    pub fn undo(&self, session_id: SessionId) -> HistoryResult<Reversal> {
        self.reverse(session_id, StackKind::Undo)
    }

    /// Re-applies the most recently undone transaction of a session.
    ///
    /// # Errors
    ///
    /// Same as [`UndoEngine::undo`].
    pub fn redo(&self, session_id: SessionId) -> HistoryResult<Reversal> {
        self.reverse(session_id, StackKind::Redo)
    }

    fn reverse(&self, session_id: SessionId, from: StackKind) -> HistoryResult<Reversal> {
        let session = self.session(session_id)?;
        let mut history = lock(&session);
        if history.journal.is_open() {
            return Err(HistoryError::state(format!(
                "cannot {from} while session {session_id} has an open transaction"
            )));
        }

        let Some(txn_id) = history.stacks.top(from) else {
            return Err(HistoryError::EmptyStack(from));
        };
        let transaction = self.transaction(session_id, txn_id)?;

        let undo = from == StackKind::Undo;
        let mut seqs: Vec<Seq> = transaction.seqs().collect();
        if undo {
            seqs.reverse();
        }
        let changes = seqs
            .into_iter()
            .map(|seq| history.journal.read(seq))
            .collect::<HistoryResult<Vec<_>>>()?;

        let signals = self.replay(&changes, undo)?;

        // Stacks move only after the audit record is durable.
        let (kind, prefix) = if undo {
            (TransactionKind::Undo, UNDO_PREFIX)
        } else {
            (TransactionKind::Redo, REDO_PREFIX)
        };
        let audit = self
            .store
            .append_transaction(
                session_id,
                TransactionDraft {
                    description: format!("{prefix}{}", transaction.description),
                    span: None,
                    timestamp: now_nanos(),
                    kind,
                    reverts: Some(transaction.id),
                },
            )
            .map_err(|e| {
                tracing::warn!(
                    session = session_id,
                    txn = transaction.id,
                    "Failed to record {from} of applied transaction: {e:#}"
                );
                e
            })?;
        history.stacks.transfer(from);

        let notifications = signals.reduce(undo);
        for notification in &notifications {
            if let Err(e) = self.sink.notify(notification) {
                tracing::warn!(
                    "Failed to deliver {} notification: {e:#}",
                    notification.signal_name()
                );
            }
        }

        tracing::debug!(
            session = session_id,
            txn = transaction.id,
            audit = audit.id,
            changes = changes.len(),
            "{from} complete"
        );

        Ok(Reversal {
            transaction,
            audit,
            notifications,
        })
    }

    /// Writes each change's snapshot back through the applier inside one
    /// applier transaction, collecting the signal table on success.
    fn replay(&self, changes: &[Change], undo: bool) -> HistoryResult<SignalTable> {
        let mut applier = lock(&self.applier);
        applier.begin()?;

        let mut signals = SignalTable::new();
        for change in changes {
            let snapshot = if undo {
                change.before.as_deref()
            } else {
                change.after.as_deref()
            };
            let applied = match &change.target {
                ChangeTarget::Object { handle } => applier
                    .apply_data(snapshot, handle, &change.object_type)
                    .map(|()| signals.record(&change.object_type, change.operation, handle)),
                ChangeTarget::Reference { handle, ref_handle } => {
                    applier.apply_reference(snapshot, handle, ref_handle)
                }
            };
            if let Err(e) = applied {
                tracing::warn!(
                    session = change.session_id,
                    seq = change.seq,
                    "Replay failed, aborting: {e}"
                );
                applier.abort();
                return Err(e.into());
            }
        }

        if let Err(e) = applier.commit() {
            tracing::warn!("Applier commit failed, aborting: {e}");
            applier.abort();
            return Err(e.into());
        }
        Ok(signals)
    }
}
