// Shared fixtures for integration tests: an in-memory transactional object
// store standing in for the authoritative database, and a sink that keeps
// every notification it receives.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use undolog::{
    ApplyError, ChangeTarget, MutationApplier, NewChange, Notification, NotificationSink,
    Operation, SessionId, Seq, UndoEngine,
};

/// Externally observable contents of the in-memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Data {
    pub objects: BTreeMap<(String, String), Vec<u8>>,
    pub references: BTreeMap<(String, String), Vec<u8>>,
}

/// A write staged inside an applier transaction.
#[derive(Debug)]
enum Staged {
    Object((String, String), Option<Vec<u8>>),
    Reference((String, String), Option<Vec<u8>>),
}

#[derive(Debug, Default)]
struct State {
    committed: Data,
    staged: Option<Vec<Staged>>,
    fail_on: Option<String>,
    commits: usize,
    aborts: usize,
}

/// Object store with begin/commit/abort semantics.
#[derive(Debug, Clone, Default)]
pub struct MemoryApplier {
    state: Arc<Mutex<State>>,
}

fn write(map: &mut BTreeMap<(String, String), Vec<u8>>, key: (String, String), value: Option<&[u8]>) {
    match value {
        Some(v) => {
            map.insert(key, v.to_vec());
        }
        None => {
            map.remove(&key);
        }
    }
}

impl MemoryApplier {
    pub fn data(&self) -> Data {
        self.state.lock().unwrap().committed.clone()
    }

    pub fn get(&self, object_type: &str, handle: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .committed
            .objects
            .get(&(object_type.to_string(), handle.to_string()))
            .cloned()
    }

    /// Writes straight into committed data, as a live mutation would.
    pub fn write_object(&self, object_type: &str, handle: &str, value: Option<&[u8]>) {
        let mut state = self.state.lock().unwrap();
        let key = (object_type.to_string(), handle.to_string());
        write(&mut state.committed.objects, key, value);
    }

    pub fn write_reference(&self, handle: &str, ref_handle: &str, value: Option<&[u8]>) {
        let mut state = self.state.lock().unwrap();
        let key = (handle.to_string(), ref_handle.to_string());
        write(&mut state.committed.references, key, value);
    }

    pub fn fail_on(&self, handle: Option<&str>) {
        self.state.lock().unwrap().fail_on = handle.map(str::to_string);
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn aborts(&self) -> usize {
        self.state.lock().unwrap().aborts
    }

    fn stage(&mut self, handle: &str, write: Staged) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_on.as_deref() == Some(handle) {
            return Err(ApplyError::new(format!("refusing to write {handle}")));
        }
        let staged = state
            .staged
            .as_mut()
            .ok_or_else(|| ApplyError::new("no applier transaction is open"))?;
        staged.push(write);
        Ok(())
    }
}

impl MutationApplier for MemoryApplier {
    fn begin(&mut self) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap();
        if state.staged.is_some() {
            return Err(ApplyError::new("applier transaction already open"));
        }
        state.staged = Some(Vec::new());
        Ok(())
    }

    fn apply_data(
        &mut self,
        snapshot: Option<&[u8]>,
        handle: &str,
        object_type: &str,
    ) -> Result<(), ApplyError> {
        let key = (object_type.to_string(), handle.to_string());
        self.stage(handle, Staged::Object(key, snapshot.map(<[u8]>::to_vec)))
    }

    fn apply_reference(
        &mut self,
        snapshot: Option<&[u8]>,
        handle: &str,
        ref_handle: &str,
    ) -> Result<(), ApplyError> {
        let key = (handle.to_string(), ref_handle.to_string());
        self.stage(handle, Staged::Reference(key, snapshot.map(<[u8]>::to_vec)))
    }

    fn commit(&mut self) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap();
        let staged = state
            .staged
            .take()
            .ok_or_else(|| ApplyError::new("no applier transaction is open"))?;
        for write_op in staged {
            match write_op {
                Staged::Object(key, value) => {
                    write(&mut state.committed.objects, key, value.as_deref())
                }
                Staged::Reference(key, value) => {
                    write(&mut state.committed.references, key, value.as_deref())
                }
            }
        }
        state.commits += 1;
        Ok(())
    }

    fn abort(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.staged = None;
        state.aborts += 1;
    }
}

/// Sink that keeps every notification it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.received.lock().unwrap())
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.received.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Performs a live object mutation and journals it.
///
/// `value = None` deletes the object. The operation kind is derived from
/// whether the object existed before.
pub fn put(
    engine: &UndoEngine,
    applier: &MemoryApplier,
    session: SessionId,
    object_type: &str,
    handle: &str,
    value: Option<&[u8]>,
) -> Seq {
    let before = applier.get(object_type, handle);
    let after = value.map(<[u8]>::to_vec);
    let operation = match (&before, &after) {
        (None, Some(_)) => Operation::Add,
        (Some(_), None) => Operation::Delete,
        (Some(_), Some(_)) => Operation::Update,
        (None, None) => panic!("cannot delete missing {object_type} {handle}"),
    };
    applier.write_object(object_type, handle, value);
    engine
        .append(
            session,
            NewChange::new(object_type, operation, ChangeTarget::object(handle), before, after),
        )
        .expect("append")
}

/// Adds a reference between two objects and journals it.
pub fn link(
    engine: &UndoEngine,
    applier: &MemoryApplier,
    session: SessionId,
    handle: &str,
    ref_handle: &str,
    value: &[u8],
) -> Seq {
    applier.write_reference(handle, ref_handle, Some(value));
    engine
        .append(
            session,
            NewChange::new(
                "Reference",
                Operation::Add,
                ChangeTarget::reference(handle, ref_handle),
                None,
                Some(value.to_vec()),
            ),
        )
        .expect("append")
}
