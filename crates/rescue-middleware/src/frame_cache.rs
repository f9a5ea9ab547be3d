//! Single-slot cache for the most recent camera frame.
//!
//! Frames are overwritten, never queued: a camera publishing at a high rate
//! cannot build up a backlog. Each MJPEG client holds a [`FrameWatcher`] whose
//! [`Notify`] is poked on every publish; the client then reads the slot
//! itself, so a frame is never buffered once per client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use rescue_types::SubscriberId;
use tokio::sync::Notify;

/// A cached frame and its sequence token.
///
/// `seq` starts at 1 and increases by one on every publish; it is the
/// identity used by MJPEG clients to skip frames they already sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u64,
    pub data: Bytes,
}

#[derive(Default)]
struct Slot {
    seq: u64,
    frame: Option<Frame>,
}

#[derive(Default)]
pub struct FrameCache {
    slot: Mutex<Slot>,
    watchers: Mutex<HashMap<SubscriberId, Arc<Notify>>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watchers(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<Notify>>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the cached frame and wake every watcher. Returns the new
    /// sequence token.
    pub fn publish(&self, data: impl Into<Bytes>) -> u64 {
        let seq = {
            let mut slot = self.slot();
            slot.seq += 1;
            let seq = slot.seq;
            slot.frame = Some(Frame {
                seq,
                data: data.into(),
            });
            seq
        };
        self.wake_watchers();
        seq
    }

    /// The newest frame, if any has arrived yet.
    pub fn latest(&self) -> Option<Frame> {
        self.slot().frame.clone()
    }

    /// Signal every watcher without changing the frame.
    ///
    /// Signals coalesce: several wake-ups before a watcher waits count as one.
    pub fn wake_watchers(&self) {
        let watchers: Vec<Arc<Notify>> = self.watchers().values().cloned().collect();
        for notify in watchers {
            notify.notify_one();
        }
    }

    /// Register a new watcher. It is removed again when dropped.
    pub fn watch(self: &Arc<Self>) -> FrameWatcher {
        let id = SubscriberId::new();
        let notify = Arc::new(Notify::new());
        self.watchers().insert(id, Arc::clone(&notify));
        FrameWatcher {
            id,
            notify,
            cache: Arc::clone(self),
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers().len()
    }
}

/// Per-client wake-up signal on a [`FrameCache`].
pub struct FrameWatcher {
    id: SubscriberId,
    notify: Arc<Notify>,
    cache: Arc<FrameCache>,
}

impl FrameWatcher {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait until signalled or until `timeout` elapses. Returns `true` when
    /// signalled.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }

    pub fn latest(&self) -> Option<Frame> {
        self.cache.latest()
    }
}

impl Drop for FrameWatcher {
    fn drop(&mut self) {
        self.cache.watchers().remove(&self.id);
    }
}
