/// Core record types persisted by the log store.
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Identifier of a session; allocated by the store starting at 1.
pub type SessionId = u64;

/// Per-session change sequence number; dense and starting at 1.
pub type Seq = u64;

/// Per-session transaction number; dense and starting at 1.
pub type TransactionId = u64;

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Kind of modification a change records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Delete,
    Update,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a change was applied to.
///
/// Decided once when the change is appended: a change carrying a secondary
/// id is a reference change and is replayed through the reference primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeTarget {
    /// A standalone object, addressed by its handle.
    Object { handle: String },
    /// A relationship between two objects.
    Reference { handle: String, ref_handle: String },
}

impl ChangeTarget {
    pub fn object(handle: impl Into<String>) -> Self {
        Self::Object {
            handle: handle.into(),
        }
    }

    pub fn reference(handle: impl Into<String>, ref_handle: impl Into<String>) -> Self {
        Self::Reference {
            handle: handle.into(),
            ref_handle: ref_handle.into(),
        }
    }

    /// Primary handle of the target.
    pub fn handle(&self) -> &str {
        match self {
            Self::Object { handle } | Self::Reference { handle, .. } => handle,
        }
    }

    /// Secondary handle, present only for reference changes.
    pub fn ref_handle(&self) -> Option<&str> {
        match self {
            Self::Object { .. } => None,
            Self::Reference { ref_handle, .. } => Some(ref_handle),
        }
    }
}

/// One logical history owner, e.g. a single client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Identity of the user owning the session, if known.
    pub owner: Option<String>,
    /// Logical database (tree) the session mutates, if known.
    pub tree: Option<String>,
    /// Creation time in nanoseconds since the Unix epoch.
    pub created_at: i64,
}

/// Why a transaction record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// A normal committed group of changes.
    Commit,
    /// Audit record of an undo.
    Undo,
    /// Audit record of a redo.
    Redo,
}

/// A committed group of changes, or the audit record of a reversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub session_id: SessionId,
    pub description: String,
    /// Inclusive `(first, last)` change span. `None` for audit records.
    pub span: Option<(Seq, Seq)>,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub kind: TransactionKind,
    /// For audit records, the transaction that was reverted or re-applied.
    pub reverts: Option<TransactionId>,
}

impl Transaction {
    /// Whether this is the audit record of a reversal rather than a commit.
    pub fn is_undo(&self) -> bool {
        self.kind != TransactionKind::Commit
    }

    /// Sequence numbers spanned, in ascending order.
    pub fn seqs(&self) -> RangeInclusive<Seq> {
        match self.span {
            Some((first, last)) => first..=last,
            #[allow(clippy::reversed_empty_ranges)]
            None => 1..=0,
        }
    }

    /// Number of changes spanned.
    pub fn len(&self) -> u64 {
        self.span.map_or(0, |(first, last)| last - first + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.span.is_none()
    }
}

/// A single journaled modification, keyed by `(session_id, seq)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub session_id: SessionId,
    pub seq: Seq,
    pub object_type: String,
    pub operation: Operation,
    pub target: ChangeTarget,
    /// Opaque snapshot before the change (`None` for additions).
    pub before: Option<Vec<u8>>,
    /// Opaque snapshot after the change (`None` for deletions).
    pub after: Option<Vec<u8>>,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Change {
    /// Drops both snapshots, keeping only the change metadata.
    pub fn without_snapshots(mut self) -> Self {
        self.before = None;
        self.after = None;
        self
    }
}

/// Input to `append`: a change that has not been assigned a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChange {
    pub object_type: String,
    pub operation: Operation,
    pub target: ChangeTarget,
    pub before: Option<Vec<u8>>,
    pub after: Option<Vec<u8>>,
}

impl NewChange {
    pub fn new(
        object_type: impl Into<String>,
        operation: Operation,
        target: ChangeTarget,
        before: Option<Vec<u8>>,
        after: Option<Vec<u8>>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            operation,
            target,
            before,
            after,
        }
    }

    /// Checks the snapshot-presence invariant for the operation kind.
    ///
    /// Returns a description of the violation, if any.
    pub fn check(&self) -> Result<(), String> {
        if self.object_type.is_empty() {
            return Err("object type must not be empty".to_string());
        }
        if self.target.handle().is_empty() {
            return Err("primary id must not be empty".to_string());
        }
        if self.target.ref_handle() == Some("") {
            return Err("secondary id must not be empty when present".to_string());
        }
        let expected = match self.operation {
            Operation::Add => (false, true),
            Operation::Delete => (true, false),
            Operation::Update => (true, true),
        };
        let actual = (self.before.is_some(), self.after.is_some());
        if actual != expected {
            return Err(format!(
                "{} of {} {:?} has before={} after={}, expected before={} after={}",
                self.operation,
                self.object_type,
                self.target.handle(),
                actual.0,
                actual.1,
                expected.0,
                expected.1,
            ));
        }
        Ok(())
    }

    pub(crate) fn into_change(self, session_id: SessionId, seq: Seq) -> Change {
        Change {
            session_id,
            seq,
            object_type: self.object_type,
            operation: self.operation,
            target: self.target,
            before: self.before,
            after: self.after,
            timestamp: now_nanos(),
        }
    }
}
