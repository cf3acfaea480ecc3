//! HTTP-backed remote store and snapshot source.

use crate::error::RemoteError;
use matdar_core::ingest::decode_batch;
use matdar_core::source::{RemoteStore, SnapshotSource};
use matdar_core::Record;
use reqwest::blocking::Client;
use reqwest::Url;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("matdar/", env!("CARGO_PKG_VERSION"));

fn build_client(timeout: Duration) -> Result<Client, RemoteError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|source| RemoteError::Transport {
            url: String::new(),
            source,
        })
}

fn parse_url(url: &str) -> Result<Url, RemoteError> {
    Url::parse(url).map_err(|e| RemoteError::BadUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// GET `url` and return the body of a successful response
fn get_bytes(client: &Client, url: &Url) -> Result<Vec<u8>, RemoteError> {
    let transport = |source| RemoteError::Transport {
        url: url.to_string(),
        source,
    };

    let response = client.get(url.clone()).send().map_err(transport)?;
    let status = response.status();
    if !status.is_success() {
        return Err(RemoteError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.bytes().map_err(transport)?;
    debug!(url = %url, bytes = body.len(), "Fetched");
    Ok(body.to_vec())
}

fn decode(bytes: &[u8], batch: &str, origin: &str) -> Result<Vec<Record>, RemoteError> {
    let report = decode_batch(bytes, batch).map_err(|source| RemoteError::Decode {
        origin: origin.to_string(),
        source,
    })?;
    Ok(report.records)
}

/// Append the `v` query parameter used for cache busting.
///
/// # Example
/// ```
/// use matdar_remote::cache_busted_url;
/// let url = cache_busted_url("https://example.org/roll.json?lang=mr", "2024-11").unwrap();
/// assert_eq!(url.as_str(), "https://example.org/roll.json?lang=mr&v=2024-11");
/// ```
pub fn cache_busted_url(url: &str, version: &str) -> Result<Url, RemoteError> {
    let mut url = parse_url(url)?;
    url.query_pairs_mut().append_pair("v", version);
    Ok(url)
}

/// The remote record collection, read with one GET.
pub struct HttpRemoteStore {
    client: Client,
    url: Url,
    batch: String,
}

impl HttpRemoteStore {
    /// Create a store for the collection at `url`
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(HttpRemoteStore {
            client: build_client(timeout)?,
            url: parse_url(url)?,
            batch: "remote".to_string(),
        })
    }

    /// Namespace for synthetic identifiers of fetched records
    pub fn with_batch_namespace(mut self, batch: impl Into<String>) -> Self {
        self.batch = batch.into();
        self
    }

    /// Fetch and decode the collection
    pub fn fetch(&self) -> Result<Vec<Record>, RemoteError> {
        let bytes = get_bytes(&self.client, &self.url)?;
        let records = decode(&bytes, &self.batch, self.url.as_str())?;
        info!(url = %self.url, records = records.len(), "Fetched remote records");
        Ok(records)
    }
}

impl RemoteStore for HttpRemoteStore {
    fn fetch_all(&self) -> anyhow::Result<Vec<Record>> {
        Ok(self.fetch()?)
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// Where the bundled snapshot lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLocation {
    Url(Url),
    File(PathBuf),
}

impl SnapshotLocation {
    /// `http(s)://` values are URLs, `file://` and everything else are paths
    pub fn parse(value: &str) -> Result<Self, RemoteError> {
        let value = value.trim();
        if value.starts_with("http://") || value.starts_with("https://") {
            return Ok(SnapshotLocation::Url(parse_url(value)?));
        }
        let path = value.strip_prefix("file://").unwrap_or(value);
        Ok(SnapshotLocation::File(PathBuf::from(path)))
    }
}

/// The versioned bundled snapshot.
///
/// Over HTTP, the version is appended as `?v=<version>` so a new release
/// is never served from a stale intermediary cache.
pub struct HttpSnapshotSource {
    location: SnapshotLocation,
    version: String,
    client: Client,
}

impl HttpSnapshotSource {
    pub fn new(
        location: &str,
        version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        Ok(HttpSnapshotSource {
            location: SnapshotLocation::parse(location)?,
            version: version.into(),
            client: build_client(timeout)?,
        })
    }

    pub fn location(&self) -> &SnapshotLocation {
        &self.location
    }

    /// Read and decode the snapshot
    pub fn fetch(&self) -> Result<Vec<Record>, RemoteError> {
        let batch = format!("snapshot-{}", self.version);
        match &self.location {
            SnapshotLocation::Url(url) => {
                let url = cache_busted_url(url.as_str(), &self.version)?;
                let bytes = get_bytes(&self.client, &url)?;
                decode(&bytes, &batch, url.as_str())
            }
            SnapshotLocation::File(path) => {
                let bytes = fs::read(path)?;
                decode(&bytes, &batch, &path.display().to_string())
            }
        }
    }
}

impl SnapshotSource for HttpSnapshotSource {
    fn load(&self) -> anyhow::Result<Vec<Record>> {
        Ok(self.fetch()?)
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}
