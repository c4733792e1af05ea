//! Strata live bindings: reactive `{data, loading, error}` views over
//! store queries and single documents.
//!
//! A binding owns one subscription at a time. Swapping its inputs
//! (`rebind`) always tears the previous subscription down before opening
//! the next one; a stale subscription feeding a reused view is a
//! correctness bug, not just a leak. Readers hold a [`Handle`]: an
//! `ArcSwap` snapshot of the current state plus a `watch` epoch that bumps
//! on every publish.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use strata_cloud::DocStore;
use strata_core::{CollectionRef, Query, Record, Snapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Caller-supplied query policy. `build` returns the query to bind, or
/// `None` when an input the query depends on (typically the signed-in
/// identity) is not resolved yet. `None` means "do not query at all" and
/// is distinct from a query matching zero rows.
pub trait QuerySpec: Send + Sync {
    fn build(&self, c: &CollectionRef) -> Option<Query>;
}

impl<F> QuerySpec for F
where
    F: Fn(&CollectionRef) -> Option<Query> + Send + Sync,
{
    fn build(&self, c: &CollectionRef) -> Option<Query> {
        self(c)
    }
}

/// Reactive list state as seen by a screen.
#[derive(Debug, Clone, Default)]
pub struct ListState {
    pub rows: Snapshot,
    pub loading: bool,
    pub error: Option<String>,
}

impl ListState {
    fn loading() -> Self {
        Self { rows: Vec::new(), loading: true, error: None }
    }

    fn not_ready() -> Self {
        Self { rows: Vec::new(), loading: false, error: None }
    }

    fn ready(rows: Snapshot) -> Self {
        Self { rows, loading: false, error: None }
    }

    fn failed(message: String) -> Self {
        Self { rows: Vec::new(), loading: false, error: Some(message) }
    }
}

/// Reactive single-document state. `doc: None` with no error is the valid
/// not-found terminal state.
#[derive(Debug, Clone, Default)]
pub struct DocState {
    pub doc: Option<Record>,
    pub loading: bool,
    pub error: Option<String>,
}

impl DocState {
    fn loading() -> Self {
        Self { doc: None, loading: true, error: None }
    }

    fn not_ready() -> Self {
        Self { doc: None, loading: false, error: None }
    }

    fn ready(doc: Option<Record>) -> Self {
        Self { doc, loading: false, error: None }
    }

    fn failed(message: String) -> Self {
        Self { doc: None, loading: false, error: Some(message) }
    }
}

/// How a collection binding runs: an optional query policy and whether to
/// keep a live subscription open (default) or fetch exactly once.
#[derive(Clone)]
pub struct BindOptions {
    pub spec: Option<Arc<dyn QuerySpec>>,
    pub listen: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self { spec: None, listen: true }
    }
}

impl BindOptions {
    pub fn with_spec(mut self, spec: impl QuerySpec + 'static) -> Self {
        self.spec = Some(Arc::new(spec));
        self
    }

    /// Fetch once instead of subscribing. One-shot views do not observe
    /// later mutations until `refetch` is called.
    pub fn one_shot(mut self) -> Self {
        self.listen = false;
        self
    }
}

/// Reader handle for a binding's state: current snapshot plus epoch
/// notifications. Cheap to clone; outlives the binding without keeping its
/// subscription alive.
pub struct Handle<S> {
    state: Arc<ArcSwap<S>>,
    epoch_rx: watch::Receiver<u64>,
}

impl<S> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state), epoch_rx: self.epoch_rx.clone() }
    }
}

impl<S> Handle<S> {
    pub fn current(&self) -> Arc<S> {
        self.state.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }
}

// Shared publication state: snapshot, epoch, and the generation counter
// that fences out publishes from torn-down drivers.
struct Core<S> {
    state: Arc<ArcSwap<S>>,
    epoch_tx: Arc<watch::Sender<u64>>,
    epoch_rx: watch::Receiver<u64>,
    generation: Arc<AtomicU64>,
}

impl<S> Core<S> {
    fn new(initial: S) -> Self {
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        Self {
            state: Arc::new(ArcSwap::from_pointee(initial)),
            epoch_tx: Arc::new(epoch_tx),
            epoch_rx,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn handle(&self) -> Handle<S> {
        Handle { state: Arc::clone(&self.state), epoch_rx: self.epoch_rx.clone() }
    }

    // Publisher pinned to the current generation; its publishes become
    // no-ops once the binding is re-opened or dropped.
    fn publisher(&self) -> Publisher<S> {
        Publisher {
            state: Arc::clone(&self.state),
            epoch_tx: Arc::clone(&self.epoch_tx),
            generation: Arc::clone(&self.generation),
            pinned: self.generation.load(Ordering::SeqCst),
        }
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

struct Publisher<S> {
    state: Arc<ArcSwap<S>>,
    epoch_tx: Arc<watch::Sender<u64>>,
    generation: Arc<AtomicU64>,
    pinned: u64,
}

impl<S> Publisher<S> {
    /// Store a new state unless the binding moved on; returns whether the
    /// publish landed.
    fn publish(&self, next: S) -> bool {
        if self.generation.load(Ordering::SeqCst) != self.pinned {
            return false;
        }
        self.state.store(Arc::new(next));
        self.epoch_tx.send_modify(|e| *e += 1);
        true
    }
}

/// Live view over a collection query.
pub struct CollectionBinding {
    store: Arc<dyn DocStore>,
    collection: CollectionRef,
    opts: BindOptions,
    core: Core<ListState>,
    driver: Option<JoinHandle<()>>,
}

impl CollectionBinding {
    /// Bind a collection and start delivering state. With no spec the raw
    /// unfiltered collection is bound; a spec returning `None` short
    /// circuits to a settled empty view without touching the store.
    pub fn bind(store: Arc<dyn DocStore>, collection: &str, opts: BindOptions) -> Self {
        let mut b = Self {
            store,
            collection: CollectionRef::new(collection),
            opts,
            core: Core::new(ListState::loading()),
            driver: None,
        };
        b.open();
        b
    }

    pub fn current(&self) -> Arc<ListState> {
        self.core.state.load_full()
    }

    pub fn handle(&self) -> Handle<ListState> {
        self.core.handle()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.core.epoch_rx.clone()
    }

    /// Swap the binding's inputs. The previous subscription is torn down
    /// before the new one opens; results from the two are never mixed.
    pub fn rebind(&mut self, opts: BindOptions) {
        self.close();
        self.opts = opts;
        self.open();
    }

    /// Manual re-fetch for one-shot bindings, which do not observe
    /// mutations on their own. Also usable as a forced resync.
    pub async fn refetch(&self) {
        let publisher = self.core.publisher();
        let Some(query) = self.build_query() else {
            publisher.publish(ListState::not_ready());
            return;
        };
        match self.store.get_once(query).await {
            Ok(rows) => {
                publisher.publish(ListState::ready(rows));
            }
            Err(e) => {
                publisher.publish(ListState::failed(e.to_string()));
            }
        }
    }

    fn build_query(&self) -> Option<Query> {
        match &self.opts.spec {
            Some(spec) => spec.build(&self.collection),
            None => Some(self.collection.all()),
        }
    }

    fn open(&mut self) {
        let publisher = self.core.publisher();
        let Some(query) = self.build_query() else {
            publisher.publish(ListState::not_ready());
            return;
        };
        publisher.publish(ListState::loading());
        let store = Arc::clone(&self.store);
        let listen = self.opts.listen;
        let name = self.collection.name().to_string();
        self.driver = Some(tokio::spawn(async move {
            if listen {
                match store.subscribe(query).await {
                    Ok(mut sh) => {
                        while let Some(push) = sh.rx.recv().await {
                            match push {
                                Ok(rows) => {
                                    metrics::counter!("bind_snapshots_total", 1u64);
                                    metrics::gauge!("bind_rows", rows.len() as f64);
                                    if !publisher.publish(ListState::ready(rows)) {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(collection = %name, error = %e, "subscription error");
                                    publisher.publish(ListState::failed(e.to_string()));
                                    break;
                                }
                            }
                        }
                        // Channel closed: keep the last delivered state.
                    }
                    Err(e) => {
                        warn!(collection = %name, error = %e, "subscribe rejected");
                        publisher.publish(ListState::failed(e.to_string()));
                    }
                }
            } else {
                match store.get_once(query).await {
                    Ok(rows) => {
                        publisher.publish(ListState::ready(rows));
                    }
                    Err(e) => {
                        warn!(collection = %name, error = %e, "one-shot fetch failed");
                        publisher.publish(ListState::failed(e.to_string()));
                    }
                }
            }
        }));
    }

    fn close(&mut self) {
        // Fence first so an in-flight publish cannot land mid-teardown.
        self.core.invalidate();
        if let Some(h) = self.driver.take() {
            h.abort();
        }
    }
}

impl Drop for CollectionBinding {
    fn drop(&mut self) {
        self.close();
    }
}

/// Live view over a single document by id.
pub struct DocumentBinding {
    store: Arc<dyn DocStore>,
    collection: String,
    id: String,
    listen: bool,
    core: Core<DocState>,
    driver: Option<JoinHandle<()>>,
}

impl DocumentBinding {
    /// Bind one document. An empty id short circuits to a settled empty
    /// view, exactly like a not-ready query spec.
    pub fn bind(store: Arc<dyn DocStore>, collection: &str, id: &str, listen: bool) -> Self {
        let mut b = Self {
            store,
            collection: collection.to_string(),
            id: id.to_string(),
            listen,
            core: Core::new(DocState::loading()),
            driver: None,
        };
        b.open();
        b
    }

    pub fn current(&self) -> Arc<DocState> {
        self.core.state.load_full()
    }

    pub fn handle(&self) -> Handle<DocState> {
        self.core.handle()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.core.epoch_rx.clone()
    }

    /// Re-key the binding to another document id, tearing the previous
    /// subscription down first.
    pub fn rebind(&mut self, id: &str) {
        self.close();
        self.id = id.to_string();
        self.open();
    }

    /// Manual re-fetch for non-listening bindings.
    pub async fn refetch(&self) {
        let publisher = self.core.publisher();
        if self.id.is_empty() {
            publisher.publish(DocState::not_ready());
            return;
        }
        match self.store.get_doc(&self.collection, &self.id).await {
            Ok(doc) => {
                publisher.publish(DocState::ready(doc));
            }
            Err(e) => {
                publisher.publish(DocState::failed(e.to_string()));
            }
        }
    }

    fn open(&mut self) {
        let publisher = self.core.publisher();
        if self.id.is_empty() {
            publisher.publish(DocState::not_ready());
            return;
        }
        publisher.publish(DocState::loading());
        let store = Arc::clone(&self.store);
        let collection = self.collection.clone();
        let id = self.id.clone();
        let listen = self.listen;
        self.driver = Some(tokio::spawn(async move {
            if listen {
                match store.subscribe_doc(&collection, &id).await {
                    Ok(mut sh) => {
                        while let Some(push) = sh.rx.recv().await {
                            match push {
                                Ok(doc) => {
                                    if !publisher.publish(DocState::ready(doc)) {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(collection = %collection, id = %id, error = %e, "doc subscription error");
                                    publisher.publish(DocState::failed(e.to_string()));
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(collection = %collection, id = %id, error = %e, "doc subscribe rejected");
                        publisher.publish(DocState::failed(e.to_string()));
                    }
                }
            } else {
                match store.get_doc(&collection, &id).await {
                    Ok(doc) => {
                        publisher.publish(DocState::ready(doc));
                    }
                    Err(e) => {
                        publisher.publish(DocState::failed(e.to_string()));
                    }
                }
            }
        }));
    }

    fn close(&mut self) {
        self.core.invalidate();
        if let Some(h) = self.driver.take() {
            h.abort();
        }
    }
}

impl Drop for DocumentBinding {
    fn drop(&mut self) {
        self.close();
    }
}
