/// Reduction of a reversal's raw change triples into notification batches.
///
/// Triples are grouped by object type and recorded operation. On undo the
/// sense of additions and deletions is flipped. Batches are emitted
/// deletions first, then additions, then updates. An object reported as
/// deleted is never also reported as added or updated in the same reversal.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::Operation;

/// Externally observable direction of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sense {
    Delete,
    Add,
    Update,
}

impl Sense {
    /// Emission order.
    pub const ORDER: [Sense; 3] = [Sense::Delete, Sense::Add, Sense::Update];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Add => "add",
            Self::Update => "update",
        }
    }

    /// Recorded operation that is observed in this sense after a reversal.
    pub fn recorded_as(self, undo: bool) -> Operation {
        match (self, undo) {
            (Self::Delete, false) | (Self::Add, true) => Operation::Delete,
            (Self::Add, false) | (Self::Delete, true) => Operation::Add,
            (Self::Update, _) => Operation::Update,
        }
    }
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One batch: every handle of `object_type` observed in `sense`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub object_type: String,
    pub sense: Sense,
    pub handles: Vec<String>,
}

impl Notification {
    /// Conventional signal name, e.g. `Person-delete`.
    pub fn signal_name(&self) -> String {
        format!("{}-{}", self.object_type, self.sense)
    }
}

#[derive(Debug, Default)]
struct TypeSignals {
    added: BTreeSet<String>,
    deleted: BTreeSet<String>,
    updated: BTreeSet<String>,
}

impl TypeSignals {
    fn handles_mut(&mut self, operation: Operation) -> &mut BTreeSet<String> {
        match operation {
            Operation::Add => &mut self.added,
            Operation::Delete => &mut self.deleted,
            Operation::Update => &mut self.updated,
        }
    }

    fn handles(&self, operation: Operation) -> &BTreeSet<String> {
        match operation {
            Operation::Add => &self.added,
            Operation::Delete => &self.deleted,
            Operation::Update => &self.updated,
        }
    }
}

/// Raw `(object type, operation, handle)` triples of one reversal,
/// grouped by type and by operation as recorded.
#[derive(Debug, Default)]
pub struct SignalTable {
    by_type: BTreeMap<String, TypeSignals>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, object_type: &str, operation: Operation, handle: &str) {
        self.by_type
            .entry(object_type.to_string())
            .or_default()
            .handles_mut(operation)
            .insert(handle.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Derives the ordered notification batches.
    ///
    /// `undo` selects whether recorded additions and deletions are flipped.
    pub fn reduce(&self, undo: bool) -> Vec<Notification> {
        let mut out = Vec::new();
        for sense in Sense::ORDER {
            for (object_type, signals) in &self.by_type {
                let handles = signals.handles(sense.recorded_as(undo));
                let handles: Vec<String> = match sense {
                    Sense::Delete => handles.iter().cloned().collect(),
                    Sense::Add | Sense::Update => {
                        let deleted = signals.handles(Sense::Delete.recorded_as(undo));
                        handles
                            .iter()
                            .filter(|h| !deleted.contains(*h))
                            .cloned()
                            .collect()
                    }
                };
                if !handles.is_empty() {
                    out.push(Notification {
                        object_type: object_type.clone(),
                        sense,
                        handles,
                    });
                }
            }
        }
        out
    }
}
