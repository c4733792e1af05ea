//! Imperative writes: create/update/delete wrappers over the store with
//! per-operation busy flags and timestamp stamping.
//!
//! The three verbs are independent so concurrent mutations against the
//! same collection never visually block each other. None of them touches
//! bound data: live bindings observe the store's own change delivery, and
//! one-shot views must re-fetch themselves.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use strata_cloud::DocStore;
use strata_core::{server_timestamp, DocId, StoreResult, CREATED_AT, UPDATED_AT};
use tracing::{debug, warn};

// Clears the flag on every exit path, error or not.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn hold(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(Arc::clone(flag))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Write access to one collection.
pub struct Writer {
    store: Arc<dyn DocStore>,
    collection: String,
    creating: Arc<AtomicBool>,
    updating: Arc<AtomicBool>,
    deleting: Arc<AtomicBool>,
}

impl Writer {
    pub fn new(store: Arc<dyn DocStore>, collection: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            creating: Arc::new(AtomicBool::new(false)),
            updating: Arc::new(AtomicBool::new(false)),
            deleting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_creating(&self) -> bool {
        self.creating.load(Ordering::SeqCst)
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting.load(Ordering::SeqCst)
    }

    /// Write a new record and return its id. A server-assigned creation
    /// timestamp is attached unless the payload already carries one.
    /// Errors propagate to the caller; surfacing them is the caller's job.
    pub async fn create(&self, payload: Value) -> StoreResult<DocId> {
        let _busy = BusyGuard::hold(&self.creating);
        let mut payload = payload;
        if let Value::Object(fields) = &mut payload {
            fields.entry(CREATED_AT.to_string()).or_insert_with(server_timestamp);
        }
        let id = self.store.create(&self.collection, payload).await.map_err(|e| {
            warn!(collection = %self.collection, error = %e, "create failed");
            e
        })?;
        debug!(collection = %self.collection, id = %id, "create ok");
        Ok(id)
    }

    /// Merge `patch` into an existing record and stamp the update time.
    pub async fn update(&self, id: &str, patch: Value) -> StoreResult<()> {
        let _busy = BusyGuard::hold(&self.updating);
        let mut patch = patch;
        if let Value::Object(fields) = &mut patch {
            fields.insert(UPDATED_AT.to_string(), server_timestamp());
        }
        self.store.update(&self.collection, id, patch).await.map_err(|e| {
            warn!(collection = %self.collection, id, error = %e, "update failed");
            e
        })?;
        debug!(collection = %self.collection, id, "update ok");
        Ok(())
    }

    /// Hard delete. Features wanting archival keep their own flag on top;
    /// this layer has no soft-delete semantics.
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let _busy = BusyGuard::hold(&self.deleting);
        self.store.delete(&self.collection, id).await.map_err(|e| {
            warn!(collection = %self.collection, id, error = %e, "delete failed");
            e
        })?;
        debug!(collection = %self.collection, id, "delete ok");
        Ok(())
    }
}
