//! Session registry of connected workers
//!
//! Handles are kept in registration order behind a read-write lock. Readers
//! clone the `Arc`s out and release the lock immediately, so discovery never
//! waits on an in-flight call.

use super::handle::WorkerHandle;
use parking_lot::RwLock;
use reppo_core::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Registry of worker handles indexed by identity
#[derive(Default)]
pub struct SessionRegistry {
    handles: RwLock<Vec<Arc<WorkerHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle; a duplicate identity is a configuration error
    pub fn register(&self, handle: Arc<WorkerHandle>) -> Result<()> {
        let mut handles = self.handles.write();
        if handles.iter().any(|h| h.identity() == handle.identity()) {
            return Err(Error::configuration(format!(
                "Worker identity '{}' is already registered",
                handle.identity()
            )));
        }
        debug!(identity = %handle.identity(), "Registering worker");
        handles.push(handle);
        Ok(())
    }

    /// Remove a handle, returning it if it was registered
    pub fn unregister(&self, identity: &str) -> Option<Arc<WorkerHandle>> {
        let mut handles = self.handles.write();
        let index = handles.iter().position(|h| h.identity() == identity)?;
        debug!(identity = %identity, "Unregistering worker");
        Some(handles.remove(index))
    }

    pub fn get(&self, identity: &str) -> Option<Arc<WorkerHandle>> {
        self.handles
            .read()
            .iter()
            .find(|h| h.identity() == identity)
            .cloned()
    }

    /// All handles in registration order, including terminated ones
    pub fn list(&self) -> Vec<Arc<WorkerHandle>> {
        self.handles.read().clone()
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}
