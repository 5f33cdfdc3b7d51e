/// Forward-only, restartable iteration over a session's stored changes.
use std::sync::Arc;

use crate::error::HistoryResult;
use crate::record::{Change, SessionId, Seq};
use crate::store::LogStore;

/// Lazily walks a session's changes in ascending sequence order.
///
/// Each step is a separate keyed read, so changes appended while the
/// cursor is live are picked up once it reaches them.
pub struct Cursor {
    store: Arc<LogStore>,
    session_id: SessionId,
    position: Seq,
    done: bool,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("session_id", &self.session_id)
            .field("position", &self.position)
            .field("done", &self.done)
            .finish()
    }
}

impl Cursor {
    pub fn new(store: Arc<LogStore>, session_id: SessionId) -> Self {
        Self {
            store,
            session_id,
            position: 1,
            done: false,
        }
    }

    /// Rewinds to the start and yields the first change, if any.
    pub fn first(&mut self) -> Option<HistoryResult<Change>> {
        self.position = 1;
        self.done = false;
        self.next()
    }
}

impl Iterator for Cursor {
    type Item = HistoryResult<Change>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.store.next_change(self.session_id, self.position) {
            Ok(Some(change)) => {
                self.position = change.seq + 1;
                Some(Ok(change))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}
