//! Source reconciliation.
//!
//! The [`Reconciler`] decides which of the three sources is canonical and
//! keeps the local cache in step with the remote store.
//!
//! ## Startup
//!
//! Sources are probed in priority order: local cache (when it holds
//! records), then the bundled snapshot, then nothing. A snapshot that
//! yields records is persisted to the cache so later starts find it there.
//!
//! ## Refresh
//!
//! A refresh runs only while online:
//!
//! 1. Fetch the full remote record set
//! 2. Compare it with the current set using the [`ChangeDetector`]
//! 3. If changed, persist it, stamp the sync time and adopt it
//! 4. On failure, keep the current set and report the error
//!
//! Being offline is not a failure; the cycle is skipped. Failed cycles are
//! not retried before the next scheduled one.

use crate::error::{ErrorKind, MatdarError, Result};
use crate::persistence::DatasetCache;
use crate::source::{Connectivity, RemoteStore, SnapshotSource};
use crate::types::{
    CanonicalDataset, DatasetFingerprint, Provenance, Record, SyncPhase, SyncState,
};
use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// How a fetched record set is compared with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetector {
    /// Changed iff the record count differs.
    ///
    /// Edits that keep the count (a corrected phone number, say) go
    /// unnoticed until the count moves.
    #[default]
    Count,

    /// Changed iff the content fingerprint differs
    Fingerprint,
}

impl ChangeDetector {
    /// Whether `fresh` should replace `current`
    pub fn has_changed(&self, current: &CanonicalDataset, fresh: &[Record]) -> bool {
        match self {
            ChangeDetector::Count => current.len() != fresh.len(),
            ChangeDetector::Fingerprint => {
                current.revision().fingerprint != DatasetFingerprint::of(fresh)
            }
        }
    }
}

/// Result of one refresh attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    /// A new dataset was adopted
    pub changed: bool,

    /// The cycle did not run (offline, no remote configured)
    pub skipped: bool,

    /// Kind of failure, if the attempt failed
    pub error: Option<ErrorKind>,

    /// Records in the fetched set, when a fetch happened
    pub fetched: Option<usize>,
}

impl RefreshOutcome {
    fn skipped() -> Self {
        RefreshOutcome {
            skipped: true,
            ..Default::default()
        }
    }

    fn failed(kind: ErrorKind) -> Self {
        RefreshOutcome {
            error: Some(kind),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A change in reachability observed by [`Reconciler::probe_connectivity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChange {
    pub was_online: bool,
    pub online: bool,
}

impl ConnectivityChange {
    /// Offline to online
    pub fn came_online(&self) -> bool {
        !self.was_online && self.online
    }
}

/// Decides the canonical dataset and keeps it fresh.
///
/// The reconciler is the only writer of the current dataset and of
/// [`SyncState`]. Refreshes are serialized; readers get cheap copies.
pub struct Reconciler {
    cache: DatasetCache,
    snapshot: Option<Arc<dyn SnapshotSource>>,
    remote: Option<Arc<dyn RemoteStore>>,
    connectivity: Arc<dyn Connectivity>,
    detector: ChangeDetector,

    current: ArcSwap<CanonicalDataset>,
    state: RwLock<SyncState>,
    generation: AtomicU64,

    /// Held for the duration of a refresh or install
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("detector", &self.detector)
            .field("has_snapshot", &self.snapshot.is_some())
            .field("has_remote", &self.remote.is_some())
            .field("state", &*self.state.read())
            .finish()
    }
}

impl Reconciler {
    pub fn new(
        cache: DatasetCache,
        snapshot: Option<Arc<dyn SnapshotSource>>,
        remote: Option<Arc<dyn RemoteStore>>,
        connectivity: Arc<dyn Connectivity>,
        detector: ChangeDetector,
    ) -> Self {
        Reconciler {
            cache,
            snapshot,
            remote,
            connectivity,
            detector,
            current: ArcSwap::from_pointee(CanonicalDataset::empty()),
            state: RwLock::new(SyncState::default()),
            generation: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// The dataset most recently adopted
    pub fn current(&self) -> Arc<CanonicalDataset> {
        self.current.load_full()
    }

    /// Copy of the sync state
    pub fn sync_state(&self) -> SyncState {
        self.state.read().clone()
    }

    /// Whether any source has produced records
    pub fn availability(&self) -> bool {
        self.state.read().available
    }

    pub fn detector(&self) -> ChangeDetector {
        self.detector
    }

    pub fn connectivity(&self) -> &Arc<dyn Connectivity> {
        &self.connectivity
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn adopt(&self, dataset: CanonicalDataset) -> Arc<CanonicalDataset> {
        let dataset = Arc::new(dataset);
        self.current.store(Arc::clone(&dataset));
        {
            let mut state = self.state.write();
            state.available = !dataset.is_empty();
            if dataset.revision().last_sync.is_some() {
                state.last_sync = dataset.revision().last_sync;
            }
        }
        info!(
            records = dataset.len(),
            provenance = %dataset.provenance(),
            generation = dataset.revision().generation,
            "Canonical dataset adopted"
        );
        dataset
    }

    /// Probe the sources and adopt the highest-priority non-empty one.
    #[instrument(skip(self))]
    pub fn determine_canonical_dataset(&self) -> Arc<CanonicalDataset> {
        let _guard = self.write_lock.lock();
        let last_sync = self.cache.last_sync();

        if let Some(records) = self.cache.load_records().filter(|r| !r.is_empty()) {
            let dataset = CanonicalDataset::new(
                records,
                Provenance::LocalCache,
                self.next_generation(),
                last_sync,
            );
            return self.adopt(dataset);
        }

        if let Some(records) = self.load_snapshot() {
            if let Err(e) = self.persist_initial(&records) {
                warn!(error = %e, "Could not persist snapshot to the cache");
            }
            let dataset = CanonicalDataset::new(
                records,
                Provenance::BundledSnapshot,
                self.next_generation(),
                last_sync,
            );
            return self.adopt(dataset);
        }

        let reason = MatdarError::SourceUnavailable {
            reason: "no cached records and no usable snapshot".to_string(),
        };
        warn!(error = %reason, "Starting with an empty dataset");
        {
            let mut state = self.state.write();
            state.last_sync = last_sync;
            state.last_error = reason.kind();
            state.last_error_message = Some(reason.to_string());
        }
        self.adopt(CanonicalDataset::new(
            Vec::new(),
            Provenance::Empty,
            self.next_generation(),
            last_sync,
        ))
    }

    fn load_snapshot(&self) -> Option<Vec<Record>> {
        let snapshot = self.snapshot.as_ref()?;
        match snapshot.load() {
            Ok(records) if records.is_empty() => {
                debug!(version = %snapshot.version(), "Bundled snapshot is empty");
                None
            }
            Ok(records) => {
                info!(
                    version = %snapshot.version(),
                    records = records.len(),
                    "Loaded bundled snapshot"
                );
                Some(records)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load bundled snapshot");
                None
            }
        }
    }

    fn persist_initial(&self, records: &[Record]) -> Result<()> {
        self.cache.save_records(records)?;
        self.cache.set_initial_data_acquired(true)
    }

    /// Re-probe connectivity and record the result in the sync state
    pub fn probe_connectivity(&self) -> ConnectivityChange {
        let online = self.connectivity.is_online();
        let mut state = self.state.write();
        let change = ConnectivityChange {
            was_online: state.online,
            online,
        };
        state.online = online;
        if change.was_online != online {
            info!(online, "Connectivity changed");
        }
        change
    }

    /// Run one refresh cycle against the remote store.
    ///
    /// Never panics and never rolls back: on failure the current dataset
    /// stays and the error is reported in the outcome and the sync state.
    #[instrument(skip(self))]
    pub fn maybe_refresh(&self) -> RefreshOutcome {
        let Some(remote) = self.remote.as_ref() else {
            debug!("No remote store configured, skipping refresh");
            return RefreshOutcome::skipped();
        };

        if !self.probe_connectivity().online {
            debug!("Offline, skipping refresh");
            return RefreshOutcome::skipped();
        }

        let _guard = self.write_lock.lock();
        self.state.write().phase = SyncPhase::Syncing;

        match self.refresh_from(remote.as_ref()) {
            Ok(outcome) => {
                let mut state = self.state.write();
                state.phase = SyncPhase::Success;
                state.last_error = None;
                state.last_error_message = None;
                outcome
            }
            Err(e) => {
                error!(remote = %remote.describe(), error = %e, "Sync failed");
                let kind = e.kind().unwrap_or(ErrorKind::RefreshFailed);
                let mut state = self.state.write();
                state.phase = SyncPhase::Error;
                state.last_error = Some(kind);
                state.last_error_message = Some(e.to_string());
                RefreshOutcome::failed(kind)
            }
        }
    }

    fn refresh_from(&self, remote: &dyn RemoteStore) -> Result<RefreshOutcome> {
        let records = remote
            .fetch_all()
            .map_err(|e| MatdarError::refresh("fetch", format!("{e:#}")))?;
        let fetched = Some(records.len());
        let current = self.current();

        if !self.detector.has_changed(&current, &records) {
            info!(
                records = records.len(),
                detector = ?self.detector,
                "Remote data unchanged"
            );
            return Ok(RefreshOutcome {
                fetched,
                ..Default::default()
            });
        }

        let now = Utc::now();
        self.cache
            .save_records(&records)
            .map_err(|e| MatdarError::refresh("persist", e))?;
        self.cache
            .set_last_sync(now)
            .map_err(|e| MatdarError::refresh("persist", e))?;
        self.cache
            .set_initial_data_acquired(true)
            .map_err(|e| MatdarError::refresh("persist", e))?;

        info!(
            previous = current.len(),
            records = records.len(),
            "Remote data changed"
        );
        self.adopt(CanonicalDataset::new(
            records,
            Provenance::Remote,
            self.next_generation(),
            Some(now),
        ));

        Ok(RefreshOutcome {
            changed: true,
            fetched,
            ..Default::default()
        })
    }

    /// Persist and adopt an externally supplied record set.
    ///
    /// Used when a host imports an ingestion export directly.
    pub fn install(
        &self,
        records: Vec<Record>,
        provenance: Provenance,
    ) -> Result<Arc<CanonicalDataset>> {
        let _guard = self.write_lock.lock();
        self.persist_initial(&records)?;
        let last_sync = self.state.read().last_sync;
        Ok(self.adopt(CanonicalDataset::new(
            records,
            provenance,
            self.next_generation(),
            last_sync,
        )))
    }

    /// Drop every cached value and fall back to an empty dataset
    pub fn clear(&self) -> Result<Arc<CanonicalDataset>> {
        let _guard = self.write_lock.lock();
        self.cache.clear()?;
        {
            let mut state = self.state.write();
            let online = state.online;
            *state = SyncState {
                online,
                ..Default::default()
            };
        }
        Ok(self.adopt(CanonicalDataset::new(
            Vec::new(),
            Provenance::Empty,
            self.next_generation(),
            None,
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::{ManualConnectivity, StaticSnapshot};
    use crate::store::{CacheStore, MemoryCacheStore};
    use std::collections::VecDeque;

    type Scripted = std::result::Result<Vec<Record>, String>;

    /// Remote store that replays scripted responses, repeating the last one
    pub(crate) struct ScriptedRemote {
        responses: Mutex<VecDeque<Scripted>>,
        last: Mutex<Scripted>,
        delay: std::time::Duration,
        pub(crate) calls: AtomicU64,
    }

    impl ScriptedRemote {
        pub(crate) fn new(responses: Vec<Scripted>) -> Self {
            ScriptedRemote {
                responses: Mutex::new(responses.into()),
                last: Mutex::new(Ok(Vec::new())),
                delay: std::time::Duration::ZERO,
                calls: AtomicU64::new(0),
            }
        }

        /// Make every fetch take at least `delay`
        pub(crate) fn with_delay(mut self, delay: std::time::Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl RemoteStore for ScriptedRemote {
        fn fetch_all(&self) -> anyhow::Result<Vec<Record>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            let next = match self.responses.lock().pop_front() {
                Some(next) => {
                    *self.last.lock() = next.clone();
                    next
                }
                None => self.last.lock().clone(),
            };
            next.map_err(anyhow::Error::msg)
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Cache store whose writes can be made to fail
    pub(crate) struct FlakyStore {
        inner: MemoryCacheStore,
        pub(crate) fail_writes: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        pub(crate) fn new() -> Self {
            FlakyStore {
                inner: MemoryCacheStore::new(),
                fail_writes: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    impl CacheStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }

        fn clear(&self) -> Result<()> {
            self.inner.clear()
        }
    }

    fn memory() -> Arc<dyn CacheStore> {
        Arc::new(MemoryCacheStore::new())
    }

    pub(crate) fn voters(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("V{i}").as_str(), format!("Voter {i}"), "1"))
            .collect()
    }

    fn reconciler(
        store: Arc<dyn CacheStore>,
        snapshot: Option<Vec<Record>>,
        remote: Option<Arc<ScriptedRemote>>,
        online: bool,
        detector: ChangeDetector,
    ) -> (Reconciler, Arc<ManualConnectivity>) {
        let connectivity = Arc::new(ManualConnectivity::new(online));
        let reconciler = Reconciler::new(
            DatasetCache::new(store),
            snapshot.map(|r| Arc::new(StaticSnapshot::new(r, "1")) as Arc<dyn SnapshotSource>),
            remote.map(|r| r as Arc<dyn RemoteStore>),
            Arc::clone(&connectivity) as Arc<dyn Connectivity>,
            detector,
        );
        (reconciler, connectivity)
    }

    #[test]
    fn test_startup_priority() {
        // Nothing anywhere
        let (r, _) = reconciler(memory(), None, None, false, ChangeDetector::Count);
        let dataset = r.determine_canonical_dataset();
        assert_eq!(dataset.provenance(), Provenance::Empty);
        assert!(!r.availability());
        assert_eq!(r.sync_state().last_error, Some(ErrorKind::SourceUnavailable));

        // Snapshot only: adopted and persisted
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let (r, _) = reconciler(
            Arc::clone(&store),
            Some(voters(3)),
            None,
            false,
            ChangeDetector::Count,
        );
        let dataset = r.determine_canonical_dataset();
        assert_eq!(dataset.provenance(), Provenance::BundledSnapshot);
        assert!(r.availability());
        let cache = DatasetCache::new(Arc::clone(&store));
        assert_eq!(cache.load_records().unwrap().len(), 3);
        assert!(cache.initial_data_acquired());

        // Cache wins over the snapshot on the next start
        let (r, _) = reconciler(store, Some(voters(5)), None, false, ChangeDetector::Count);
        let dataset = r.determine_canonical_dataset();
        assert_eq!(dataset.provenance(), Provenance::LocalCache);
        assert_eq!(dataset.len(), 3);
    }

    #[test]
    fn test_corrupted_cache_falls_back_to_snapshot() {
        let store = Arc::new(MemoryCacheStore::new());
        store.set(crate::persistence::KEY_RECORDS, b"truncated").unwrap();
        let (r, _) = reconciler(store, Some(voters(2)), None, false, ChangeDetector::Count);
        assert_eq!(
            r.determine_canonical_dataset().provenance(),
            Provenance::BundledSnapshot
        );
    }

    #[test]
    fn test_offline_refresh_is_skipped() {
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(voters(4))]));
        let (r, connectivity) = reconciler(
            Arc::new(MemoryCacheStore::new()),
            Some(voters(2)),
            Some(Arc::clone(&remote)),
            false,
            ChangeDetector::Count,
        );
        r.determine_canonical_dataset();

        let outcome = r.maybe_refresh();
        assert!(outcome.skipped);
        assert!(outcome.is_ok());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
        assert_eq!(r.sync_state().phase, SyncPhase::Idle);

        connectivity.set_online(true);
        let outcome = r.maybe_refresh();
        assert!(outcome.changed);
        assert_eq!(r.current().len(), 4);
        assert_eq!(r.current().provenance(), Provenance::Remote);
        assert!(r.sync_state().online);
    }

    #[test]
    fn test_refresh_adopts_and_persists() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(voters(4))]));
        let (r, _) = reconciler(
            Arc::clone(&store),
            None,
            Some(remote),
            true,
            ChangeDetector::Count,
        );
        r.determine_canonical_dataset();
        let before = r.current().revision().generation;

        let outcome = r.maybe_refresh();
        assert!(outcome.changed);
        assert_eq!(outcome.fetched, Some(4));

        let state = r.sync_state();
        assert_eq!(state.phase, SyncPhase::Success);
        assert!(state.available);
        assert!(state.last_sync.is_some());
        assert_eq!(state.last_error, None);
        assert!(r.current().revision().generation > before);

        let cache = DatasetCache::new(store);
        assert_eq!(cache.load_records().unwrap().len(), 4);
        assert!(cache.last_sync().is_some());
    }

    #[test]
    fn test_equal_count_is_a_no_op() {
        let mut edited = voters(3);
        edited[1].phone = "9800000000".to_string();

        for (detector, expect_change) in [
            (ChangeDetector::Count, false),
            (ChangeDetector::Fingerprint, true),
        ] {
            let remote = Arc::new(ScriptedRemote::new(vec![Ok(edited.clone())]));
            let (r, _) = reconciler(
                Arc::new(MemoryCacheStore::new()),
                Some(voters(3)),
                Some(remote),
                true,
                detector,
            );
            let initial = r.determine_canonical_dataset();

            let outcome = r.maybe_refresh();
            assert_eq!(outcome.changed, expect_change, "{detector:?}");
            assert!(outcome.is_ok());
            assert_eq!(r.sync_state().phase, SyncPhase::Success);
            if !expect_change {
                assert!(Arc::ptr_eq(&initial, &r.current()));
                assert!(r.sync_state().last_sync.is_none());
                assert!(r.current().records()[1].phone.is_empty());
            }
        }
    }

    #[test]
    fn test_fetch_failure_keeps_dataset() {
        let remote = Arc::new(ScriptedRemote::new(vec![
            Err("connection reset".to_string()),
            Ok(voters(5)),
        ]));
        let (r, _) = reconciler(
            Arc::new(MemoryCacheStore::new()),
            Some(voters(2)),
            Some(remote),
            true,
            ChangeDetector::Count,
        );
        let initial = r.determine_canonical_dataset();

        let outcome = r.maybe_refresh();
        assert_eq!(outcome.error, Some(ErrorKind::RefreshFailed));
        assert!(!outcome.changed);
        assert!(Arc::ptr_eq(&initial, &r.current()));
        let state = r.sync_state();
        assert_eq!(state.phase, SyncPhase::Error);
        assert!(state.last_error_message.unwrap().contains("connection reset"));

        // Next tick succeeds and clears the error
        let outcome = r.maybe_refresh();
        assert!(outcome.changed);
        assert_eq!(r.sync_state().last_error, None);
    }

    #[test]
    fn test_persist_failure_keeps_dataset() {
        let store = Arc::new(FlakyStore::new());
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(voters(6))]));
        let (r, _) = reconciler(
            Arc::clone(&store) as Arc<dyn CacheStore>,
            Some(voters(2)),
            Some(remote),
            true,
            ChangeDetector::Count,
        );
        r.determine_canonical_dataset();
        store.fail_writes.store(true, Ordering::SeqCst);

        let outcome = r.maybe_refresh();
        assert_eq!(outcome.error, Some(ErrorKind::RefreshFailed));
        assert_eq!(r.current().len(), 2);
        assert_eq!(r.sync_state().phase, SyncPhase::Error);
    }

    #[test]
    fn test_no_remote_configured() {
        let (r, _) = reconciler(memory(), None, None, true, ChangeDetector::Count);
        assert!(r.maybe_refresh().skipped);
    }

    #[test]
    fn test_install_and_clear() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let (r, _) = reconciler(Arc::clone(&store), None, None, false, ChangeDetector::Count);
        r.determine_canonical_dataset();

        let dataset = r.install(voters(7), Provenance::BundledSnapshot).unwrap();
        assert_eq!(dataset.len(), 7);
        assert!(r.availability());
        assert!(DatasetCache::new(Arc::clone(&store)).initial_data_acquired());

        let dataset = r.clear().unwrap();
        assert!(dataset.is_empty());
        assert!(!r.availability());
        assert!(DatasetCache::new(store).load_records().is_none());
    }

    #[test]
    fn test_connectivity_transitions() {
        let (r, connectivity) = reconciler(memory(), None, None, false, ChangeDetector::Count);
        assert!(!r.probe_connectivity().came_online());
        connectivity.set_online(true);
        assert!(r.probe_connectivity().came_online());
        assert!(!r.probe_connectivity().came_online());
    }
}
