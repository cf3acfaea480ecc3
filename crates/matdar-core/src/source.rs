//! External collaborator traits.
//!
//! The reconciler never talks to the network or the bundle directly. It sees
//! three data sources and a reachability signal through these traits, so
//! hosts can plug in HTTP, files, or test fakes:
//!
//! - [`RemoteStore`]: the authoritative collection, reachable only online
//! - [`SnapshotSource`]: the bundled, versioned record set for first run
//! - [`Connectivity`]: whether the remote store is currently reachable
//!
//! Changes flow back to hosts through [`DatasetListener`]; background tasks
//! are controlled with [`TaskHandle`].

use crate::types::{CanonicalDataset, DatasetRevision, Provenance, Record, SyncState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The remote, authoritative record collection.
///
/// Only full reads are used; there is no delta protocol.
pub trait RemoteStore: Send + Sync {
    /// Fetch the complete current record set.
    fn fetch_all(&self) -> anyhow::Result<Vec<Record>>;

    /// Short description for logs (e.g. the collection URL)
    fn describe(&self) -> String;
}

/// The bundled, read-only snapshot used on first run.
pub trait SnapshotSource: Send + Sync {
    /// Load the snapshot records.
    fn load(&self) -> anyhow::Result<Vec<Record>>;

    /// Snapshot version label
    fn version(&self) -> String;
}

/// Reachability of the remote store.
pub trait Connectivity: Send + Sync {
    /// Probe reachability. May block up to the implementation's timeout.
    fn is_online(&self) -> bool;
}

/// Connectivity controlled by the host.
///
/// Useful where the platform pushes network-status events instead of being
/// probed, and for offline-only setups.
#[derive(Debug)]
pub struct ManualConnectivity {
    online: AtomicBool,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        ManualConnectivity {
            online: AtomicBool::new(online),
        }
    }

    /// Update the reported status
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ManualConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

/// A snapshot already held in memory.
#[derive(Debug, Clone)]
pub struct StaticSnapshot {
    records: Vec<Record>,
    version: String,
}

impl StaticSnapshot {
    pub fn new(records: Vec<Record>, version: impl Into<String>) -> Self {
        StaticSnapshot {
            records,
            version: version.into(),
        }
    }
}

impl SnapshotSource for StaticSnapshot {
    fn load(&self) -> anyhow::Result<Vec<Record>> {
        Ok(self.records.clone())
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}

/// Handler for dataset and sync-state changes.
///
/// Called from whichever thread published the change, after the new dataset
/// is visible to searches.
pub trait DatasetListener: Send + Sync {
    /// Called when a new canonical dataset has been published
    fn on_dataset_changed(&self, dataset: &Arc<CanonicalDataset>);

    /// Called after every sync attempt
    fn on_sync_state(&self, _state: &SyncState) {}
}

impl<F> DatasetListener for F
where
    F: Fn(&Arc<CanonicalDataset>) + Send + Sync,
{
    fn on_dataset_changed(&self, dataset: &Arc<CanonicalDataset>) {
        self(dataset)
    }
}

/// Messages sent by the channel listener
#[derive(Debug, Clone)]
pub enum DatasetEvent {
    /// A new dataset was published
    Changed {
        provenance: Provenance,
        revision: DatasetRevision,
    },
    /// A sync attempt finished
    Sync(SyncState),
}

/// A channel-based listener for hosts that poll
pub struct ChannelListener {
    sender: crossbeam_channel::Sender<DatasetEvent>,
}

impl ChannelListener {
    /// Create a new channel-based listener
    pub fn new() -> (Self, crossbeam_channel::Receiver<DatasetEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (ChannelListener { sender }, receiver)
    }
}

impl DatasetListener for ChannelListener {
    fn on_dataset_changed(&self, dataset: &Arc<CanonicalDataset>) {
        let _ = self.sender.send(DatasetEvent::Changed {
            provenance: dataset.provenance(),
            revision: dataset.revision(),
        });
    }

    fn on_sync_state(&self, state: &SyncState) {
        let _ = self.sender.send(DatasetEvent::Sync(state.clone()));
    }
}

/// Handle for a running background task.
///
/// Stopping signals the task and joins its thread. Dropping the handle
/// stops the task.
pub struct TaskHandle {
    name: &'static str,
    thread: Option<JoinHandle<()>>,
    shutdown: Option<crossbeam_channel::Sender<()>>,
}

impl TaskHandle {
    /// Wrap a spawned thread and the sender that signals it to stop
    pub fn new(
        name: &'static str,
        thread: JoinHandle<()>,
        shutdown: crossbeam_channel::Sender<()>,
    ) -> Self {
        TaskHandle {
            name,
            thread: Some(thread),
            shutdown: Some(shutdown),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Signal the task to stop and wait for it
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(task = self.name, "Background task panicked");
            }
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manual_connectivity() {
        let connectivity = ManualConnectivity::new(false);
        assert!(!connectivity.is_online());
        connectivity.set_online(true);
        assert!(connectivity.is_online());
    }

    #[test]
    fn test_channel_listener() {
        let (listener, receiver) = ChannelListener::new();
        let dataset = Arc::new(CanonicalDataset::new(
            vec![Record::new("A1", "Ram", "5")],
            Provenance::Remote,
            4,
            None,
        ));

        listener.on_dataset_changed(&dataset);
        listener.on_sync_state(&SyncState::default());

        match receiver.try_recv().unwrap() {
            DatasetEvent::Changed {
                provenance,
                revision,
            } => {
                assert_eq!(provenance, Provenance::Remote);
                assert_eq!(revision.generation, 4);
                assert_eq!(revision.record_count, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(receiver.try_recv().unwrap(), DatasetEvent::Sync(_)));
    }

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        let listener = move |_: &Arc<CanonicalDataset>| flag.store(true, Ordering::SeqCst);
        listener.on_dataset_changed(&Arc::new(CanonicalDataset::empty()));
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn test_task_handle_stops_on_drop() {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let thread = std::thread::spawn(move || {
            let _ = shutdown_rx.recv_timeout(Duration::from_secs(30));
            flag.store(true, Ordering::SeqCst);
        });

        let handle = TaskHandle::new("test", thread, shutdown_tx);
        drop(handle);
        assert!(stopped.load(Ordering::SeqCst));
    }
}
