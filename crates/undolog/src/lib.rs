/// Persistent undo/redo transaction log for a mutable object database.
///
/// Every mutation is journaled as a before/after snapshot into an embedded
/// key-value store (redb). Committed groups of changes form undo units that
/// can be reverted and re-applied through an external `MutationApplier`,
/// with reduced change notifications delivered to a `NotificationSink`.
pub mod applier;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod journal;
pub mod record;
pub mod signals;
pub mod store;

pub use applier::{ApplyError, MutationApplier, NotificationSink, TracingSink};
pub use config::HistoryConfig;
pub use cursor::Cursor;
pub use engine::{HistoryEntry, Reversal, UndoEngine};
pub use error::{HistoryError, HistoryResult, StackKind};
pub use journal::TransactionHandle;
pub use record::{
    Change, ChangeTarget, NewChange, Operation, Session, SessionId, Seq, Transaction,
    TransactionId, TransactionKind,
};
pub use signals::{Notification, Sense, SignalTable};
pub use store::LogStore;
