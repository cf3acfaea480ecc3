//! Application state management.

use crate::labels::{Labels, StaticTranslator};
use matdar_core::{
    Config, Connectivity, FileCacheStore, ManualConnectivity, Registry, RemoteStore,
    SnapshotSource,
};
use matdar_remote::{HttpRemoteStore, HttpSnapshotSource, TcpConnectivity};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state.
pub struct App {
    /// Configuration
    pub config: Config,

    /// The registry over the local cache
    pub registry: Arc<Registry>,

    /// Translated UI labels
    pub labels: Labels,

    /// Where the cache lives
    pub data_dir: PathBuf,
}

impl App {
    /// Create a new application instance, loading the canonical dataset.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let data_dir = config.data_dir()?;
        let cache = Arc::new(FileCacheStore::new(&data_dir));

        let mut builder = Registry::builder(cache)
            .change_detector(config.sync.change_detection)
            .parallel_threshold(config.search.parallel_threshold)
            .default_page_size(config.search.page_size)
            .compress_cache(config.general.compress_cache)
            .connectivity(connectivity(&config));

        if let Some(location) = &config.sources.snapshot {
            let snapshot = HttpSnapshotSource::new(
                location,
                config.sources.snapshot_version.clone(),
                config.request_timeout(),
            )?;
            builder = builder.snapshot(Arc::new(snapshot) as Arc<dyn SnapshotSource>);
        }

        if let Some(url) = &config.sources.remote_url {
            let remote = HttpRemoteStore::new(url, config.request_timeout())?
                .with_batch_namespace(config.sync.batch_namespace.clone());
            builder = builder.remote(Arc::new(remote) as Arc<dyn RemoteStore>);
        }

        let registry = Arc::new(builder.open());
        let labels = Labels::new(StaticTranslator, config.search.language.clone());

        let dataset = registry.current_dataset();
        info!(
            data_dir = %data_dir.display(),
            records = dataset.len(),
            provenance = %dataset.provenance(),
            "Application initialized"
        );

        Ok(App {
            config,
            registry,
            labels,
            data_dir,
        })
    }

    /// Print the "acquire data first" notice when nothing is available.
    ///
    /// Returns true when the caller should stop.
    pub fn require_data(&self) -> bool {
        if self.registry.availability() {
            return false;
        }
        eprintln!("{}", self.labels.label("no_data"));
        true
    }
}

/// Reachability probe for the configured remote, offline when there is none
fn connectivity(config: &Config) -> Arc<dyn Connectivity> {
    match config.probe_address() {
        Some(address) => Arc::new(TcpConnectivity::new(address, config.request_timeout())),
        None => {
            if config.sources.remote_url.is_some() {
                warn!("Cannot derive a probe address from remote_url, treating as offline");
            }
            Arc::new(ManualConnectivity::new(false))
        }
    }
}
