//! Strata cloud boundary: the document-store and auth-provider contracts
//! the binding layer is written against.
//!
//! The traits here are the whole external surface, shaped by what the
//! screens need rather than by any one vendor SDK: live query
//! subscriptions delivering full result sets, one-shot fetches, three
//! write verbs, and an auth-state feed. [`memory::MemoryCloud`] implements
//! both traits in-process for tests and the CLI.

#![forbid(unsafe_code)]

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use strata_core::{AuthState, DocId, Query, Record, Snapshot, StoreResult};
use tokio::sync::{mpsc, watch};

/// One push from a live query: a fresh full result set, or the terminal
/// error that ended the subscription.
pub type QueryPush = StoreResult<Snapshot>;

/// One push from a live single-document subscription. `Ok(None)` is the
/// valid not-found state, not an error.
pub type DocPush = StoreResult<Option<Record>>;

/// Cancellation handle that aborts the underlying subscription task.
/// Dropping the handle cancels too, so an abandoned stream never outlives
/// its consumer.
#[derive(Debug)]
pub struct CancelHandle {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CancelHandle {
    pub fn new(task: tokio::task::JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A handle with nothing behind it (already-terminated streams).
    pub fn detached() -> Self {
        Self { task: None }
    }

    pub fn cancel(mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

/// Generic stream handle returned by subscription endpoints.
pub struct StreamHandle<T> {
    pub rx: mpsc::Receiver<T>,
    pub cancel: CancelHandle,
}

/// Document-store SDK contract.
///
/// Subscriptions deliver the current result set immediately and a fresh,
/// complete result set after every relevant change; consumers never see
/// incremental patches. Writes are last-write-wins at field granularity.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Open a live subscription for a query.
    async fn subscribe(&self, query: Query) -> StoreResult<StreamHandle<QueryPush>>;

    /// Fetch a query's current result set exactly once.
    async fn get_once(&self, query: Query) -> StoreResult<Snapshot>;

    /// Open a live subscription for a single document.
    async fn subscribe_doc(&self, collection: &str, id: &str) -> StoreResult<StreamHandle<DocPush>>;

    /// Fetch a single document; `Ok(None)` when it does not exist.
    async fn get_doc(&self, collection: &str, id: &str) -> StoreResult<Option<Record>>;

    /// Write a new record and return its store-assigned id. Any
    /// server-timestamp placeholders in the payload resolve at write time.
    async fn create(&self, collection: &str, payload: Value) -> StoreResult<DocId>;

    /// Merge `patch` into an existing record (top-level fields,
    /// last-write-wins). Missing record is an error.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> StoreResult<()>;

    /// Remove a record. Removing an absent record is not an error.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;
}

/// Auth-provider contract: current state plus change notifications. The
/// receiver's initial value is the provider's current report.
pub trait AuthProvider: Send + Sync {
    fn auth_state(&self) -> watch::Receiver<AuthState>;
}

pub(crate) fn queue_cap() -> usize {
    std::env::var("STRATA_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(256)
}
