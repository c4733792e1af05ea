//! In-process store + auth session implementing the cloud contracts.
//!
//! Backs tests and the CLI. Everything lives in RAM; change fanout runs on
//! a broadcast channel of touched collection names, and each subscription
//! re-evaluates its query per relevant change. Permission failures can be
//! injected per collection, and subscription open/close counts are exposed
//! so lifecycle tests can assert replace-not-leak behavior.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use strata_core::{
    is_server_timestamp, AuthState, Direction, DocId, FilterOp, Identity, Query, Record, Snapshot,
    StoreError, StoreResult,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use crate::{queue_cap, AuthProvider, CancelHandle, DocPush, DocStore, QueryPush, StreamHandle};

/// Subscription open/close and one-shot fetch counters, readable by tests.
#[derive(Debug, Default)]
pub struct SubStats {
    pub opened: AtomicU64,
    pub closed: AtomicU64,
    pub fetches: AtomicU64,
}

impl SubStats {
    pub fn opened(&self) -> u64 {
        self.opened.load(AtomicOrdering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(AtomicOrdering::SeqCst)
    }

    pub fn active(&self) -> u64 {
        self.opened().saturating_sub(self.closed())
    }
}

// Bumps the closed counter when a subscription task ends, including by
// abort.
struct ClosedOnDrop(Arc<SubStats>);

impl Drop for ClosedOnDrop {
    fn drop(&mut self) {
        self.0.closed.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

struct Shared {
    data: Mutex<HashMap<String, BTreeMap<DocId, Value>>>,
    denied: Mutex<HashSet<String>>,
}

/// In-memory document store plus scripted auth session.
pub struct MemoryCloud {
    shared: Arc<Shared>,
    changes: broadcast::Sender<String>,
    auth_tx: watch::Sender<AuthState>,
    auth_rx: watch::Receiver<AuthState>,
    stats: Arc<SubStats>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(queue_cap().max(16));
        let (auth_tx, auth_rx) = watch::channel(AuthState::Unknown);
        Self {
            shared: Arc::new(Shared {
                data: Mutex::new(HashMap::new()),
                denied: Mutex::new(HashSet::new()),
            }),
            changes,
            auth_tx,
            auth_rx,
            stats: Arc::new(SubStats::default()),
        }
    }

    /// Insert a document under a chosen id, bypassing the create path.
    /// Seeding helper for tests and the CLI.
    pub fn put(&self, collection: &str, id: &str, fields: Value) {
        let mut data = self.shared.data.lock().unwrap();
        data.entry(collection.to_string()).or_default().insert(id.to_string(), fields);
        drop(data);
        self.notify(collection);
    }

    /// Make every operation against `collection` fail with
    /// `PermissionDenied` until [`allow`](Self::allow) is called.
    pub fn deny(&self, collection: &str) {
        self.shared.denied.lock().unwrap().insert(collection.to_string());
    }

    pub fn allow(&self, collection: &str) {
        self.shared.denied.lock().unwrap().remove(collection);
    }

    pub fn stats(&self) -> Arc<SubStats> {
        Arc::clone(&self.stats)
    }

    pub fn sign_in(&self, identity: Identity) {
        let _ = self.auth_tx.send(AuthState::SignedIn(identity));
    }

    pub fn sign_out(&self) {
        let _ = self.auth_tx.send(AuthState::SignedOut);
    }

    fn notify(&self, collection: &str) {
        // No receivers is fine; nothing is listening yet.
        let _ = self.changes.send(collection.to_string());
    }

    fn check_allowed(shared: &Shared, collection: &str) -> StoreResult<()> {
        if shared.denied.lock().unwrap().contains(collection) {
            return Err(StoreError::PermissionDenied(collection.to_string()));
        }
        Ok(())
    }

    fn eval(shared: &Shared, query: &Query) -> StoreResult<Snapshot> {
        Self::check_allowed(shared, &query.collection)?;
        let data = shared.data.lock().unwrap();
        let mut rows: Vec<Record> = data
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|&(_, fields)| query.filters.iter().all(|f| matches_filter(fields, f)))
                    .map(|(id, fields)| Record::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| {
                let av = a.field(&order.field).unwrap_or(&Value::Null);
                let bv = b.field(&order.field).unwrap_or(&Value::Null);
                let ord = cmp_values(av, bv);
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        if let Some(n) = query.limit {
            rows.truncate(n);
        }
        Ok(rows)
    }

    fn read_doc(shared: &Shared, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        Self::check_allowed(shared, collection)?;
        let data = shared.data.lock().unwrap();
        Ok(data
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Record::new(id.to_string(), fields.clone())))
    }
}

fn matches_filter(fields: &Value, filter: &strata_core::Filter) -> bool {
    let actual = fields.get(&filter.field).unwrap_or(&Value::Null);
    match filter.op {
        FilterOp::Eq => *actual == filter.value,
        FilterOp::ArrayContains => {
            actual.as_array().map(|a| a.contains(&filter.value)).unwrap_or(false)
        }
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn cmp_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// Replace server-timestamp placeholders with the write-time clock.
fn resolve_server_timestamps(fields: &mut Value) {
    if let Value::Object(map) = fields {
        for (_, v) in map.iter_mut() {
            if is_server_timestamp(v) {
                *v = Value::String(now_rfc3339());
            }
        }
    }
}

#[async_trait]
impl DocStore for MemoryCloud {
    async fn subscribe(&self, query: Query) -> StoreResult<StreamHandle<QueryPush>> {
        let initial = Self::eval(&self.shared, &query)?;
        let (tx, rx) = mpsc::channel::<QueryPush>(queue_cap());
        let mut changes = self.changes.subscribe();
        let shared = Arc::clone(&self.shared);
        let stats = Arc::clone(&self.stats);
        self.stats.opened.fetch_add(1, AtomicOrdering::SeqCst);
        debug!(collection = %query.collection, filters = query.filters.len(), "subscription opened");
        let task = tokio::spawn(async move {
            let _closed = ClosedOnDrop(stats);
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(collection) if collection == query.collection => {
                        match Self::eval(&shared, &query) {
                            Ok(snap) => {
                                if tx.send(Ok(snap)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Permission revoked mid-stream: report once
                                // and end the subscription.
                                warn!(collection = %query.collection, error = %e, "subscription ended");
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "subscription lagged; resyncing");
                        match Self::eval(&shared, &query) {
                            Ok(snap) => {
                                if tx.send(Ok(snap)).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(StreamHandle { rx, cancel: CancelHandle::new(task) })
    }

    async fn get_once(&self, query: Query) -> StoreResult<Snapshot> {
        self.stats.fetches.fetch_add(1, AtomicOrdering::SeqCst);
        Self::eval(&self.shared, &query)
    }

    async fn subscribe_doc(&self, collection: &str, id: &str) -> StoreResult<StreamHandle<DocPush>> {
        let initial = Self::read_doc(&self.shared, collection, id)?;
        let (tx, rx) = mpsc::channel::<DocPush>(queue_cap());
        let mut changes = self.changes.subscribe();
        let shared = Arc::clone(&self.shared);
        let stats = Arc::clone(&self.stats);
        let collection = collection.to_string();
        let id = id.to_string();
        self.stats.opened.fetch_add(1, AtomicOrdering::SeqCst);
        let task = tokio::spawn(async move {
            let _closed = ClosedOnDrop(stats);
            let mut last = initial.clone();
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(touched) if touched == collection => {
                        match Self::read_doc(&shared, &collection, &id) {
                            Ok(cur) => {
                                // Other documents in the collection change
                                // too; only push when this one did.
                                if cur != last {
                                    last = cur.clone();
                                    if tx.send(Ok(cur)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Ok(cur) = Self::read_doc(&shared, &collection, &id) {
                            if cur != last {
                                last = cur.clone();
                                if tx.send(Ok(cur)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(StreamHandle { rx, cancel: CancelHandle::new(task) })
    }

    async fn get_doc(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        self.stats.fetches.fetch_add(1, AtomicOrdering::SeqCst);
        Self::read_doc(&self.shared, collection, id)
    }

    async fn create(&self, collection: &str, payload: Value) -> StoreResult<DocId> {
        Self::check_allowed(&self.shared, collection)?;
        let mut fields = payload;
        if !fields.is_object() {
            return Err(StoreError::Invalid("payload must be an object".to_string()));
        }
        resolve_server_timestamps(&mut fields);
        let id = uuid::Uuid::new_v4().simple().to_string();
        {
            let mut data = self.shared.data.lock().unwrap();
            data.entry(collection.to_string()).or_default().insert(id.clone(), fields);
        }
        debug!(collection, id = %id, "created");
        self.notify(collection);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> StoreResult<()> {
        Self::check_allowed(&self.shared, collection)?;
        let Value::Object(patch) = patch else {
            return Err(StoreError::Invalid("patch must be an object".to_string()));
        };
        {
            let mut data = self.shared.data.lock().unwrap();
            let fields = data
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
            if let Value::Object(existing) = fields {
                for (k, mut v) in patch {
                    if is_server_timestamp(&v) {
                        v = Value::String(now_rfc3339());
                    }
                    existing.insert(k, v);
                }
            }
        }
        self.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        Self::check_allowed(&self.shared, collection)?;
        let removed = {
            let mut data = self.shared.data.lock().unwrap();
            data.get_mut(collection).and_then(|docs| docs.remove(id)).is_some()
        };
        if removed {
            self.notify(collection);
        }
        Ok(())
    }
}

impl AuthProvider for MemoryCloud {
    fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.auth_rx.clone()
    }
}
