//! Caller-facing facade over the reconciler, index and query engine.
//!
//! The [`Registry`] owns the active (dataset, index) pair and publishes it
//! with a single atomic pointer swap. A search loads the pair once and runs
//! entirely against it, so it sees either the old or the new dataset, never
//! a mix, and never waits on a refresh in progress.

use crate::error::Result;
use crate::index::{SearchIndex, DEFAULT_PARALLEL_THRESHOLD};
use crate::persistence::DatasetCache;
use crate::reconcile::{ChangeDetector, ConnectivityChange, Reconciler, RefreshOutcome};
use crate::search::{booths, execute_with, Query, QueryPage};
use crate::source::{
    Connectivity, DatasetListener, ManualConnectivity, RemoteStore, SnapshotSource,
};
use crate::store::CacheStore;
use crate::types::{CanonicalDataset, Provenance, Record, SyncState};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Identifies a listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A published dataset together with the index built from it.
#[derive(Debug)]
pub struct Published {
    pub dataset: Arc<CanonicalDataset>,
    pub index: SearchIndex,
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    cache: Arc<dyn CacheStore>,
    snapshot: Option<Arc<dyn SnapshotSource>>,
    remote: Option<Arc<dyn RemoteStore>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    detector: ChangeDetector,
    parallel_threshold: usize,
    default_page_size: usize,
    compress_cache: bool,
}

impl RegistryBuilder {
    /// Bundled snapshot used when the cache is empty
    pub fn snapshot(mut self, snapshot: Arc<dyn SnapshotSource>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Remote store to sync from
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Reachability signal; defaults to always online
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn change_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Page size for queries that leave it unset
    pub fn default_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = page_size;
        self
    }

    /// Whether the cached record set is LZ4-compressed; on by default
    pub fn compress_cache(mut self, compress: bool) -> Self {
        self.compress_cache = compress;
        self
    }

    /// Probe the sources, build the first index and return the registry.
    pub fn open(self) -> Registry {
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(ManualConnectivity::default()));
        let reconciler = Reconciler::new(
            DatasetCache::new(self.cache).with_compression(self.compress_cache),
            self.snapshot,
            self.remote,
            connectivity,
            self.detector,
        );

        reconciler.probe_connectivity();
        let dataset = reconciler.determine_canonical_dataset();
        let index = SearchIndex::build(&dataset, self.parallel_threshold);

        Registry {
            reconciler,
            published: ArcSwap::from_pointee(Published { dataset, index }),
            listeners: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            publish_lock: Mutex::new(()),
            parallel_threshold: self.parallel_threshold,
            default_page_size: self.default_page_size,
        }
    }
}

/// The offline voter registry.
///
/// ## Example
///
/// ```rust,ignore
/// use matdar_core::{MemoryCacheStore, Query, Registry};
/// use std::sync::Arc;
///
/// let registry = Registry::builder(Arc::new(MemoryCacheStore::new()))
///     .remote(remote)
///     .open();
/// let page = registry.search(&Query::text("shyam").with_booths(["7"]));
/// ```
pub struct Registry {
    reconciler: Reconciler,
    published: ArcSwap<Published>,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn DatasetListener>)>>,
    next_subscription: AtomicU64,

    /// Serializes writers so publishes happen in reconciliation order
    publish_lock: Mutex<()>,

    parallel_threshold: usize,
    default_page_size: usize,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let published = self.published.load();
        f.debug_struct("Registry")
            .field("provenance", &published.dataset.provenance())
            .field("records", &published.dataset.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl Registry {
    /// Start building a registry over `cache`
    pub fn builder(cache: Arc<dyn CacheStore>) -> RegistryBuilder {
        RegistryBuilder {
            cache,
            snapshot: None,
            remote: None,
            connectivity: None,
            detector: ChangeDetector::default(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            default_page_size: 0,
            compress_cache: true,
        }
    }

    /// Whether any source has produced records.
    ///
    /// Hosts gate their "acquire data first" state on this.
    pub fn availability(&self) -> bool {
        self.reconciler.availability()
    }

    /// The active dataset
    pub fn current_dataset(&self) -> Arc<CanonicalDataset> {
        Arc::clone(&self.published.load().dataset)
    }

    /// The active (dataset, index) pair
    pub fn published(&self) -> Arc<Published> {
        self.published.load_full()
    }

    pub fn sync_state(&self) -> SyncState {
        self.reconciler.sync_state()
    }

    /// Register a listener for dataset and sync-state changes
    pub fn subscribe(&self, listener: impl DatasetListener + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        debug!(subscription = id.0, "Listener subscribed");
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    /// Run a query against the active index
    pub fn search(&self, query: &Query) -> QueryPage {
        let published = self.published.load_full();
        if query.page_size == 0 && self.default_page_size > 0 {
            let query = query.clone().page_size(self.default_page_size);
            return execute_with(published.index.records(), &query, self.parallel_threshold);
        }
        execute_with(published.index.records(), query, self.parallel_threshold)
    }

    /// Distinct booth numbers of the active dataset
    pub fn booths(&self) -> Vec<String> {
        booths(&self.published.load().index)
    }

    /// Run one refresh cycle now, publishing the result if it changed.
    pub fn sync_now(&self) -> RefreshOutcome {
        let _guard = self.publish_lock.lock();
        let outcome = self.reconciler.maybe_refresh();
        if outcome.changed {
            self.publish(self.reconciler.current());
        }
        if !outcome.skipped {
            let state = self.reconciler.sync_state();
            for listener in self.listener_snapshot() {
                listener.on_sync_state(&state);
            }
        }
        outcome
    }

    /// Re-probe connectivity and record it in the sync state
    pub fn probe_connectivity(&self) -> ConnectivityChange {
        self.reconciler.probe_connectivity()
    }

    /// Adopt an externally supplied record set, persisting it to the cache.
    pub fn import(&self, records: Vec<Record>) -> Result<Arc<CanonicalDataset>> {
        let _guard = self.publish_lock.lock();
        let dataset = self.reconciler.install(records, Provenance::BundledSnapshot)?;
        self.publish(Arc::clone(&dataset));
        Ok(dataset)
    }

    /// Drop all cached data and publish an empty dataset.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.publish_lock.lock();
        let dataset = self.reconciler.clear()?;
        self.publish(dataset);
        Ok(())
    }

    fn listener_snapshot(&self) -> Vec<Arc<dyn DatasetListener>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    /// Index `dataset` and swap it in
    fn publish(&self, dataset: Arc<CanonicalDataset>) {
        let index = SearchIndex::build(&dataset, self.parallel_threshold);
        self.published.store(Arc::new(Published {
            dataset: Arc::clone(&dataset),
            index,
        }));
        info!(
            records = dataset.len(),
            provenance = %dataset.provenance(),
            "Dataset published"
        );

        for listener in self.listener_snapshot() {
            listener.on_dataset_changed(&dataset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::reconcile::tests::{voters, ScriptedRemote};
    use crate::source::{ChannelListener, DatasetEvent, StaticSnapshot};
    use crate::store::MemoryCacheStore;
    use std::sync::atomic::AtomicUsize;

    fn sample_records() -> Vec<Record> {
        vec![
            Record::new("A1", "राम", "5"),
            Record::new("B2", "Shyam", "7"),
        ]
    }

    fn ids(page: &QueryPage) -> Vec<&str> {
        page.records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_end_to_end_scenario() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let registry = Registry::builder(Arc::new(MemoryCacheStore::new()))
            .snapshot(Arc::new(StaticSnapshot::new(sample_records(), "1")))
            .open();
        assert!(registry.availability());

        let page = registry.search(&Query::text("ram"));
        assert_eq!(ids(&page), vec!["A1"]);
        assert_eq!(page.total_matched, 1);

        let page = registry.search(&Query::all().with_booths(["7"]));
        assert_eq!(ids(&page), vec!["B2"]);

        let first = registry.search(&Query::text("").page(1).page_size(1));
        let second = registry.search(&Query::text("").page(2).page_size(1));
        assert_eq!(ids(&first), vec!["A1"]);
        assert_eq!(ids(&second), vec!["B2"]);
        assert_eq!(first.total_matched, 2);
        assert_eq!(second.total_matched, 2);
    }

    #[test]
    fn test_empty_dataset_is_unavailable() {
        let registry = Registry::builder(Arc::new(MemoryCacheStore::new())).open();
        assert!(!registry.availability());
        assert!(registry.current_dataset().is_empty());
        assert_eq!(registry.search(&Query::all()).total_matched, 0);
        assert_eq!(
            registry.sync_state().last_error,
            Some(ErrorKind::SourceUnavailable)
        );
    }

    #[test]
    fn test_sync_publishes_and_notifies() {
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(voters(4)), Ok(voters(4))]));
        let registry = Registry::builder(Arc::new(MemoryCacheStore::new()))
            .snapshot(Arc::new(StaticSnapshot::new(sample_records(), "1")))
            .remote(remote)
            .open();

        let (listener, events) = ChannelListener::new();
        registry.subscribe(listener);
        let held = registry.published();

        let outcome = registry.sync_now();
        assert!(outcome.changed);
        assert_eq!(registry.current_dataset().len(), 4);
        assert_eq!(registry.search(&Query::text("voter")).total_matched, 4);

        // A reader that loaded the old pair keeps a consistent view
        assert_eq!(held.dataset.len(), 2);
        assert_eq!(held.index.len(), 2);

        assert!(matches!(
            events.try_recv().unwrap(),
            DatasetEvent::Changed { provenance: Provenance::Remote, .. }
        ));
        assert!(matches!(events.try_recv().unwrap(), DatasetEvent::Sync(_)));

        // Same count: no publish, only a sync-state event
        let outcome = registry.sync_now();
        assert!(!outcome.changed);
        assert!(matches!(events.try_recv().unwrap(), DatasetEvent::Sync(_)));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe() {
        let registry = Registry::builder(Arc::new(MemoryCacheStore::new())).open();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = registry.subscribe(move |_: &Arc<CanonicalDataset>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.import(voters(2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.import(voters(3)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_import_and_clear() {
        let registry = Registry::builder(Arc::new(MemoryCacheStore::new())).open();
        registry.import(sample_records()).unwrap();
        assert!(registry.availability());
        assert_eq!(registry.booths(), vec!["5", "7"]);

        registry.clear().unwrap();
        assert!(!registry.availability());
        assert!(registry.booths().is_empty());
    }

    #[test]
    fn test_default_page_size() {
        let registry = Registry::builder(Arc::new(MemoryCacheStore::new()))
            .default_page_size(3)
            .open();
        registry.import(voters(10)).unwrap();

        let page = registry.search(&Query::all());
        assert_eq!(page.records.len(), 3);
        assert_eq!(page.page_count(), 4);

        let page = registry.search(&Query::all().page_size(5));
        assert_eq!(page.records.len(), 5);
    }

    #[test]
    fn test_concurrent_searches_during_sync() {
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(voters(300))]));
        let registry = Arc::new(
            Registry::builder(Arc::new(MemoryCacheStore::new()))
                .snapshot(Arc::new(StaticSnapshot::new(voters(100), "1")))
                .remote(remote)
                .open(),
        );

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let page = registry.search(&Query::text("voter").page_size(1000));
                        assert!(page.total_matched == 100 || page.total_matched == 300);
                        assert_eq!(page.records.len(), page.total_matched);
                    }
                })
            })
            .collect();

        assert!(registry.sync_now().changed);
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.current_dataset().len(), 300);
    }
}
