//! Long-lived background tasks.
//!
//! Both tasks run on their own thread and stop through a [`TaskHandle`]:
//!
//! - [`SyncScheduler`] refreshes once at start, then every interval, plus
//!   whenever triggered
//! - [`ConnectivityMonitor`] re-probes reachability and refreshes right away
//!   when the device comes back online

use crate::registry::Registry;
use crate::source::TaskHandle;
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Periodic refresh driver.
#[derive(Debug)]
pub struct SyncScheduler {
    handle: TaskHandle,
    trigger: Sender<()>,
}

impl SyncScheduler {
    /// Start the scheduler thread
    pub fn spawn(registry: Arc<Registry>, interval: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        // One pending trigger is enough; extra ones coalesce
        let (trigger_tx, trigger_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("matdar-sync".to_string())
            .spawn(move || run_scheduler(registry, interval, shutdown_rx, trigger_rx))?;

        info!(interval_secs = interval.as_secs(), "Sync scheduler started");
        Ok(SyncScheduler {
            handle: TaskHandle::new("sync-scheduler", thread, shutdown_tx),
            trigger: trigger_tx,
        })
    }

    /// Request a refresh as soon as possible
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the scheduler and wait for it
    pub fn stop(mut self) {
        self.handle.stop();
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }
}

fn run_scheduler(
    registry: Arc<Registry>,
    interval: Duration,
    shutdown: Receiver<()>,
    trigger: Receiver<()>,
) {
    loop {
        let outcome = registry.sync_now();
        debug!(?outcome, "Scheduled sync finished");

        select! {
            recv(shutdown) -> _ => break,
            recv(trigger) -> msg => {
                if msg.is_err() {
                    break;
                }
            }
            default(interval) => {}
        }

        // A stop request beats a trigger that queued up alongside it
        match shutdown.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }
    }
    debug!("Sync scheduler stopped");
}

/// Reachability watcher.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    handle: TaskHandle,
}

impl ConnectivityMonitor {
    /// Start probing every `interval`.
    ///
    /// When `scheduler` is given, an offline to online transition triggers
    /// it; otherwise the monitor refreshes on its own thread.
    pub fn spawn(
        registry: Arc<Registry>,
        interval: Duration,
        scheduler: Option<Sender<()>>,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("matdar-connectivity".to_string())
            .spawn(move || loop {
                let change = registry.probe_connectivity();
                if change.came_online() {
                    info!("Back online, refreshing");
                    match &scheduler {
                        Some(trigger) => {
                            let _ = trigger.try_send(());
                        }
                        None => {
                            let outcome = registry.sync_now();
                            if let Some(kind) = outcome.error {
                                warn!(%kind, "Refresh after reconnect failed");
                            }
                        }
                    }
                }

                select! {
                    recv(shutdown_rx) -> _ => break,
                    default(interval) => {}
                }
            })?;

        Ok(ConnectivityMonitor {
            handle: TaskHandle::new("connectivity-monitor", thread, shutdown_tx),
        })
    }

    /// Stop the monitor and wait for it
    pub fn stop(mut self) {
        self.handle.stop();
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }
}

impl SyncScheduler {
    /// Sender that triggers this scheduler, for a [`ConnectivityMonitor`]
    pub fn trigger_sender(&self) -> Sender<()> {
        self.trigger.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::tests::{voters, ScriptedRemote};
    use crate::source::{Connectivity, ManualConnectivity, RemoteStore, StaticSnapshot};
    use crate::store::MemoryCacheStore;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    const HOUR: Duration = Duration::from_secs(3600);

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn registry_over(
        remote: &Arc<ScriptedRemote>,
        connectivity: Option<&Arc<ManualConnectivity>>,
    ) -> Arc<Registry> {
        let mut builder = Registry::builder(Arc::new(MemoryCacheStore::new()))
            .remote(Arc::clone(remote) as Arc<dyn RemoteStore>);
        if let Some(connectivity) = connectivity {
            builder = builder.connectivity(Arc::clone(connectivity) as Arc<dyn Connectivity>);
        }
        Arc::new(builder.open())
    }

    #[test]
    fn test_scheduler_runs_immediately_and_on_trigger() {
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(voters(2)), Ok(voters(3))]));
        let registry = registry_over(&remote, None);

        let scheduler = SyncScheduler::spawn(Arc::clone(&registry), HOUR).unwrap();
        assert!(wait_for(|| registry.current_dataset().len() == 2));

        scheduler.trigger();
        assert!(wait_for(|| registry.current_dataset().len() == 3));

        scheduler.stop();
        let calls = remote.calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(remote.calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_scheduler_interval() {
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(voters(1))]));
        let registry = registry_over(&remote, None);

        let interval = Duration::from_millis(10);
        let scheduler = SyncScheduler::spawn(Arc::clone(&registry), interval).unwrap();
        assert!(wait_for(|| remote.calls.load(Ordering::SeqCst) >= 3));
        drop(scheduler);
    }

    #[test]
    fn test_scheduler_stop_during_slow_fetch() {
        let fetch_time = Duration::from_millis(300);
        for stop_by_drop in [false, true] {
            let remote =
                Arc::new(ScriptedRemote::new(vec![Ok(voters(2))]).with_delay(fetch_time));
            let registry = registry_over(&remote, None);

            let scheduler = SyncScheduler::spawn(Arc::clone(&registry), HOUR).unwrap();
            assert!(wait_for(|| remote.calls.load(Ordering::SeqCst) == 1));
            // Queued behind the in-flight fetch; must not start another one
            scheduler.trigger();

            let started = Instant::now();
            if stop_by_drop {
                drop(scheduler);
            } else {
                scheduler.stop();
            }
            let waited = started.elapsed();

            assert!(waited < fetch_time + Duration::from_secs(2), "waited {waited:?}");
            assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
            // The fetch in flight finished and was published
            assert_eq!(registry.current_dataset().len(), 2);
        }
    }

    #[test]
    fn test_monitor_refreshes_when_back_online() {
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(voters(5))]));
        let connectivity = Arc::new(ManualConnectivity::new(false));
        let registry = Arc::new(
            Registry::builder(Arc::new(MemoryCacheStore::new()))
                .snapshot(Arc::new(StaticSnapshot::new(voters(2), "1")))
                .remote(Arc::clone(&remote) as Arc<dyn RemoteStore>)
                .connectivity(Arc::clone(&connectivity) as Arc<dyn Connectivity>)
                .open(),
        );

        let check_every = Duration::from_millis(5);
        let monitor = ConnectivityMonitor::spawn(Arc::clone(&registry), check_every, None).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
        assert!(!registry.sync_state().online);

        connectivity.set_online(true);
        assert!(wait_for(|| registry.current_dataset().len() == 5));
        assert!(registry.sync_state().online);

        monitor.stop();
    }

    #[test]
    fn test_monitor_stop_during_slow_refresh() {
        let fetch_time = Duration::from_millis(300);
        for stop_by_drop in [false, true] {
            let remote =
                Arc::new(ScriptedRemote::new(vec![Ok(voters(3))]).with_delay(fetch_time));
            let connectivity = Arc::new(ManualConnectivity::new(false));
            let registry = registry_over(&remote, Some(&connectivity));

            let check_every = Duration::from_millis(5);
            let monitor =
                ConnectivityMonitor::spawn(Arc::clone(&registry), check_every, None).unwrap();
            connectivity.set_online(true);
            assert!(wait_for(|| remote.calls.load(Ordering::SeqCst) == 1));

            let started = Instant::now();
            if stop_by_drop {
                drop(monitor);
            } else {
                monitor.stop();
            }
            let waited = started.elapsed();

            assert!(waited < fetch_time + Duration::from_secs(2), "waited {waited:?}");
            assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_monitor_triggers_scheduler() {
        let remote = Arc::new(ScriptedRemote::new(vec![Ok(voters(4))]));
        let connectivity = Arc::new(ManualConnectivity::new(false));
        let registry = registry_over(&remote, Some(&connectivity));

        let scheduler = SyncScheduler::spawn(Arc::clone(&registry), HOUR).unwrap();
        let monitor = ConnectivityMonitor::spawn(
            Arc::clone(&registry),
            Duration::from_millis(5),
            Some(scheduler.trigger_sender()),
        )
        .unwrap();

        connectivity.set_online(true);
        assert!(wait_for(|| registry.current_dataset().len() == 4));

        monitor.stop();
        scheduler.stop();
    }
}
