/// Log store backed by redb.
///
/// Uses a single redb database file with three tables:
/// - `sessions`: bincode-serialized `Session` keyed by `session_id`
/// - `transactions`: bincode-serialized `Transaction` keyed by `(session_id, txn_id)`
/// - `changes`: bincode-serialized `Change` keyed by `(session_id, seq)`
///
/// Every append runs in its own write transaction, so a reader never
/// observes a partially written record. Identifiers are allocated inside
/// that same write transaction as one past the highest existing key.
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::record::{
    Change, NewChange, Session, SessionId, Seq, Transaction, TransactionId, TransactionKind,
};

/// Sessions table: session_id → bincode-serialized Session.
const SESSIONS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("sessions");

/// Transactions table: (session_id, txn_id) → bincode-serialized Transaction.
const TRANSACTIONS_TABLE: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("transactions");

/// Changes table: (session_id, seq) → bincode-serialized Change.
const CHANGES_TABLE: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("changes");

/// Returns the highest second key component stored for `session_id`, or 0.
fn last_in_session<T>(table: &T, session_id: SessionId) -> Result<u64>
where
    T: ReadableTable<(u64, u64), &'static [u8]>,
{
    let last = table
        .range::<(u64, u64)>((session_id, 0)..=(session_id, u64::MAX))
        .context("Failed to range query session keys")?
        .next_back()
        .transpose()
        .context("Failed to read last session entry")?;
    Ok(last.map_or(0, |(key, _)| key.value().1))
}

/// Fields of a transaction record that the caller decides.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub description: String,
    pub span: Option<(Seq, Seq)>,
    pub timestamp: i64,
    pub kind: TransactionKind,
    pub reverts: Option<TransactionId>,
}

/// Durable storage for sessions, transactions and changes.
///
/// Thread-safe: redb supports concurrent readers and serialized writers.
/// Shared across sessions via `Arc<LogStore>`.
pub struct LogStore {
    db: Database,
    #[cfg(test)]
    reject_transactions: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore").finish()
    }
}

impl LogStore {
    /// Opens or creates the log database at `path`.
    ///
    /// Creates the parent directory and database file if they don't exist.
    /// Initializes tables on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open log database: {}", path.display()))?;

        // Ensure tables exist
        let write_txn = db
            .begin_write()
            .context("Failed to begin initial write transaction")?;
        {
            let _ = write_txn
                .open_table(SESSIONS_TABLE)
                .context("Failed to create sessions table")?;
            let _ = write_txn
                .open_table(TRANSACTIONS_TABLE)
                .context("Failed to create transactions table")?;
            let _ = write_txn
                .open_table(CHANGES_TABLE)
                .context("Failed to create changes table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initial transaction")?;

        Ok(Arc::new(Self {
            db,
            #[cfg(test)]
            reject_transactions: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    /// Allocates and persists a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the write transaction fails.
    pub fn create_session(&self, owner: Option<&str>, tree: Option<&str>) -> Result<Session> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let session = {
            let mut table = write_txn
                .open_table(SESSIONS_TABLE)
                .context("Failed to open sessions table")?;
            let id = table
                .last()
                .context("Failed to read last session")?
                .map_or(1, |(key, _)| key.value() + 1);
            let session = Session {
                id,
                owner: owner.map(str::to_string),
                tree: tree.map(str::to_string),
                created_at: crate::record::now_nanos(),
            };
            let bytes = bincode::serialize(&session).context("Failed to serialize session")?;
            table
                .insert(id, bytes.as_slice())
                .context("Failed to insert session")?;
            session
        };
        write_txn
            .commit()
            .context("Failed to commit session")?;
        Ok(session)
    }

    /// Loads a session, or `None` if it was never created.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction or deserialization fails.
    pub fn session(&self, session_id: SessionId) -> Result<Option<Session>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(SESSIONS_TABLE)
            .context("Failed to open sessions table")?;

        match table.get(session_id).context("Failed to read session")? {
            Some(guard) => {
                let session: Session = bincode::deserialize(guard.value())
                    .context("Failed to deserialize session")?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Lists all sessions, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction fails.
    pub fn sessions(&self) -> Result<Vec<Session>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(SESSIONS_TABLE)
            .context("Failed to open sessions table")?;

        let mut sessions = Vec::new();
        for entry in table.iter().context("Failed to iterate sessions table")? {
            let (_, value_guard) = entry.context("Failed to read session entry")?;
            let session: Session = bincode::deserialize(value_guard.value())
                .context("Failed to deserialize session")?;
            sessions.push(session);
        }
        Ok(sessions)
    }

    /// Persists a change under the next sequence number of its session.
    ///
    /// Returns the assigned sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if the write transaction fails.
    pub fn append_change(&self, session_id: SessionId, change: NewChange) -> Result<Seq> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let seq = {
            let mut table = write_txn
                .open_table(CHANGES_TABLE)
                .context("Failed to open changes table")?;
            let seq = last_in_session(&table, session_id)? + 1;
            let change = change.into_change(session_id, seq);
            let bytes = bincode::serialize(&change).context("Failed to serialize change")?;
            table
                .insert((session_id, seq), bytes.as_slice())
                .context("Failed to insert change")?;
            seq
        };
        write_txn
            .commit()
            .context("Failed to commit change")?;
        Ok(seq)
    }

    /// Reads one change by key, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction or deserialization fails.
    pub fn read_change(&self, session_id: SessionId, seq: Seq) -> Result<Option<Change>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(CHANGES_TABLE)
            .context("Failed to open changes table")?;

        match table
            .get((session_id, seq))
            .context("Failed to read change")?
        {
            Some(guard) => {
                let change: Change = bincode::deserialize(guard.value())
                    .context("Failed to deserialize change")?;
                Ok(Some(change))
            }
            None => Ok(None),
        }
    }

    /// Reads the first change of a session with sequence number `>= from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction or deserialization fails.
    pub fn next_change(&self, session_id: SessionId, from: Seq) -> Result<Option<Change>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(CHANGES_TABLE)
            .context("Failed to open changes table")?;

        let entry = table
            .range::<(u64, u64)>((session_id, from)..=(session_id, u64::MAX))
            .context("Failed to range query changes table")?
            .next()
            .transpose()
            .context("Failed to read change entry")?;
        match entry {
            Some((_, value_guard)) => {
                let change: Change = bincode::deserialize(value_guard.value())
                    .context("Failed to deserialize change")?;
                Ok(Some(change))
            }
            None => Ok(None),
        }
    }

    /// Returns the highest sequence number assigned in a session, 0 if none.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction fails.
    pub fn last_seq(&self, session_id: SessionId) -> Result<Seq> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(CHANGES_TABLE)
            .context("Failed to open changes table")?;
        last_in_session(&table, session_id)
    }

    /// Persists a transaction record under the next transaction id of its session.
    ///
    /// # Errors
    ///
    /// Returns an error if the write transaction fails.
    pub fn append_transaction(
        &self,
        session_id: SessionId,
        draft: TransactionDraft,
    ) -> Result<Transaction> {
        #[cfg(test)]
        if self
            .reject_transactions
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            anyhow::bail!("Failed to begin write transaction: rejected");
        }

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let transaction = {
            let mut table = write_txn
                .open_table(TRANSACTIONS_TABLE)
                .context("Failed to open transactions table")?;
            let id = last_in_session(&table, session_id)? + 1;
            let transaction = Transaction {
                id,
                session_id,
                description: draft.description,
                span: draft.span,
                timestamp: draft.timestamp,
                kind: draft.kind,
                reverts: draft.reverts,
            };
            let bytes =
                bincode::serialize(&transaction).context("Failed to serialize transaction")?;
            table
                .insert((session_id, id), bytes.as_slice())
                .context("Failed to insert transaction")?;
            transaction
        };
        write_txn
            .commit()
            .context("Failed to commit transaction record")?;
        Ok(transaction)
    }

    /// Reads one transaction record, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction or deserialization fails.
    pub fn read_transaction(
        &self,
        session_id: SessionId,
        id: TransactionId,
    ) -> Result<Option<Transaction>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(TRANSACTIONS_TABLE)
            .context("Failed to open transactions table")?;

        match table
            .get((session_id, id))
            .context("Failed to read transaction")?
        {
            Some(guard) => {
                let transaction: Transaction = bincode::deserialize(guard.value())
                    .context("Failed to deserialize transaction")?;
                Ok(Some(transaction))
            }
            None => Ok(None),
        }
    }

    /// Reads all transaction records of a session, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction or deserialization fails.
    pub fn transactions(&self, session_id: SessionId) -> Result<Vec<Transaction>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(TRANSACTIONS_TABLE)
            .context("Failed to open transactions table")?;

        let mut transactions = Vec::new();
        for entry in table
            .range::<(u64, u64)>((session_id, 0)..=(session_id, u64::MAX))
            .context("Failed to range query transactions table")?
        {
            let (_, value_guard) = entry.context("Failed to read transaction entry")?;
            let transaction: Transaction = bincode::deserialize(value_guard.value())
                .context("Failed to deserialize transaction")?;
            transactions.push(transaction);
        }
        Ok(transactions)
    }

    /// Makes every following `append_transaction` fail until reset.
    #[cfg(test)]
    pub(crate) fn reject_transactions(&self, reject: bool) {
        self.reject_transactions
            .store(reject, std::sync::atomic::Ordering::SeqCst);
    }
}
