//! Local-protocol handle pool
//!
//! One handle per speaker address, opened on first use and reused until a
//! call through it fails. Callers evict on failure so the next use reconnects.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backends::traits::{BackendResult, LocalConnector, LocalProtocolBackend};
use crate::devices::LocalAddress;

pub struct LocalHandlePool {
    connector: Arc<dyn LocalConnector>,
    handles: RwLock<HashMap<LocalAddress, Arc<dyn LocalProtocolBackend>>>,
}

impl LocalHandlePool {
    pub fn new(connector: Arc<dyn LocalConnector>) -> Self {
        Self {
            connector,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Open or reuse the handle for `address`.
    pub async fn get(&self, address: &LocalAddress) -> BackendResult<Arc<dyn LocalProtocolBackend>> {
        if let Some(handle) = self.handles.read().await.get(address) {
            return Ok(handle.clone());
        }

        let handle = self.connector.connect(address).await?;
        let mut handles = self.handles.write().await;
        // Another caller may have connected while we were not holding the lock
        let handle = handles
            .entry(address.clone())
            .or_insert_with(|| {
                debug!("Opened local handle for {}", address);
                handle
            })
            .clone();
        Ok(handle)
    }

    /// Drop the handle for `address`; the next `get` reconnects.
    pub async fn evict(&self, address: &LocalAddress) {
        if self.handles.write().await.remove(address).is_some() {
            debug!("Evicted local handle for {}", address);
        }
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}
