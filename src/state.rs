//! Shared player state
//!
//! Holds the published snapshot, the explicitly selected device and the
//! operation lock that serializes commands against state resolution.
//! Snapshots are swapped whole; readers never see a partial update.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::model::{DeviceRef, PlaybackSnapshot};

#[derive(Default)]
pub struct SharedState {
    snapshot: RwLock<Arc<PlaybackSnapshot>>,
    selected: RwLock<Option<DeviceRef>>,
    /// Volume saved by an emulated mute
    muted_volume: RwLock<Option<u8>>,
    ops: Mutex<()>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Replace the published snapshot.
    pub async fn publish(&self, snapshot: PlaybackSnapshot) -> Arc<PlaybackSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().await = snapshot.clone();
        snapshot
    }

    /// Publish a modified copy of the current snapshot (optimistic updates).
    pub async fn update<F>(&self, f: F) -> Arc<PlaybackSnapshot>
    where
        F: FnOnce(&mut PlaybackSnapshot),
    {
        let mut guard = self.snapshot.write().await;
        let mut next = PlaybackSnapshot::clone(&guard);
        f(&mut next);
        let next = Arc::new(next);
        *guard = next.clone();
        next
    }

    pub async fn selected(&self) -> Option<DeviceRef> {
        self.selected.read().await.clone()
    }

    /// Set the explicitly selected device, returning the previous selection.
    pub async fn select(&self, device: Option<DeviceRef>) -> Option<DeviceRef> {
        std::mem::replace(&mut *self.selected.write().await, device)
    }

    pub async fn muted_volume(&self) -> Option<u8> {
        *self.muted_volume.read().await
    }

    pub async fn set_muted_volume(&self, volume: Option<u8>) {
        *self.muted_volume.write().await = volume;
    }

    /// Serialize a command or a refresh.
    pub async fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.ops.lock().await
    }

    /// Non-blocking variant used by the poller: `None` while a command runs.
    pub fn try_lock_ops(&self) -> Option<MutexGuard<'_, ()>> {
        self.ops.try_lock().ok()
    }
}
