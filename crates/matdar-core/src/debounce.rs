//! Debouncing of rapid query submissions.
//!
//! Keystroke-driven hosts submit a query per key press. The [`Debouncer`]
//! waits until submissions have been quiet for a while and then handles only
//! the latest one; superseded requests are dropped without running.

use crate::registry::Registry;
use crate::search::{Query, QueryPage};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default quiet period before a submission runs
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Coalesces submissions to the last one after a quiet period.
///
/// The handler runs on a worker thread. Dropping the debouncer discards
/// any pending submission and joins the worker; [`Debouncer::finish`] runs
/// it first.
pub struct Debouncer<T: Send + 'static> {
    sender: Option<Sender<T>>,
    worker: Option<JoinHandle<()>>,
    flush_on_close: Arc<AtomicBool>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Start a worker that calls `handler` with each settled submission
    pub fn new<F>(quiet: Duration, mut handler: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (sender, receiver) = unbounded::<T>();
        let flush_on_close = Arc::new(AtomicBool::new(false));
        let flush = Arc::clone(&flush_on_close);
        let worker = thread::spawn(move || {
            while let Ok(first) = receiver.recv() {
                let mut latest = first;
                let mut deadline = Instant::now() + quiet;
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match receiver.recv_timeout(wait) {
                        Ok(newer) => {
                            latest = newer;
                            deadline = Instant::now() + quiet;
                        }
                        Err(RecvTimeoutError::Timeout) => break,
                        Err(RecvTimeoutError::Disconnected) => {
                            if flush.load(Ordering::Acquire) {
                                handler(latest);
                            }
                            return;
                        }
                    }
                }
                handler(latest);
            }
        });

        Debouncer {
            sender: Some(sender),
            worker: Some(worker),
            flush_on_close,
        }
    }

    /// Submit a value, superseding any pending one
    pub fn submit(&self, value: T) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(value);
        }
    }

    /// Run the pending submission without waiting out the quiet period,
    /// then stop the worker
    pub fn finish(self) {
        self.flush_on_close.store(true, Ordering::Release);
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        // Disconnecting the channel ends the worker loop
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Debounced searches against a [`Registry`].
///
/// Each submission gets an increasing request id; results are delivered
/// with the id and the query of the request that produced them.
pub struct DebouncedSearch {
    debouncer: Debouncer<(u64, Query)>,
    last_request_id: AtomicU64,
}

impl DebouncedSearch {
    /// Start a debounced search worker delivering pages to `on_result`
    pub fn new<F>(registry: Arc<Registry>, quiet: Duration, on_result: F) -> Self
    where
        F: Fn(u64, &Query, QueryPage) + Send + 'static,
    {
        let debouncer = Debouncer::new(quiet, move |(id, query): (u64, Query)| {
            let start = Instant::now();
            let page = registry.search(&query);
            debug!(
                request = id,
                matched = page.total_matched,
                elapsed_us = start.elapsed().as_micros() as u64,
                "Debounced search finished"
            );
            on_result(id, &query, page);
        });

        DebouncedSearch {
            debouncer,
            last_request_id: AtomicU64::new(0),
        }
    }

    /// Submit a query; returns its request id
    pub fn submit(&self, query: Query) -> u64 {
        let id = self.last_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.debouncer.submit((id, query));
        id
    }

    /// Id of the most recent submission
    pub fn last_request_id(&self) -> u64 {
        self.last_request_id.load(Ordering::Relaxed)
    }

    /// Deliver the pending search, if any, and stop the worker
    pub fn finish(self) {
        self.debouncer.finish();
    }
}
