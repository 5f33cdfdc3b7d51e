/// Boundary traits for the authoritative data store and notification consumers.
use thiserror::Error;

use crate::signals::Notification;

/// Failure reported by a `MutationApplier`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApplyError {
    pub message: String,
}

impl ApplyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The authoritative store that snapshots are written back into on reversal.
///
/// A reversal calls `begin`, then one `apply_*` per change, then `commit`.
/// If any call fails, `abort` is invoked and must discard everything
/// applied since `begin`.
pub trait MutationApplier: Send {
    fn begin(&mut self) -> Result<(), ApplyError>;

    /// Writes `snapshot` as the state of the object, or removes the object
    /// when `snapshot` is `None`.
    fn apply_data(
        &mut self,
        snapshot: Option<&[u8]>,
        handle: &str,
        object_type: &str,
    ) -> Result<(), ApplyError>;

    /// Writes `snapshot` as the state of the reference between `handle` and
    /// `ref_handle`, or removes it when `snapshot` is `None`.
    fn apply_reference(
        &mut self,
        snapshot: Option<&[u8]>,
        handle: &str,
        ref_handle: &str,
    ) -> Result<(), ApplyError>;

    fn commit(&mut self) -> Result<(), ApplyError>;

    fn abort(&mut self);
}

/// Receives notification batches derived from reversals.
///
/// Delivery is fire-and-forget: a returned error is logged and otherwise
/// ignored.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Sink that writes every notification to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            object_type = %notification.object_type,
            sense = %notification.sense,
            handles = ?notification.handles,
            "{}",
            notification.signal_name()
        );
        Ok(())
    }
}
