//! # Matdar Remote Sources
//!
//! This crate provides the network implementations of the collaborator
//! traits defined in `matdar-core`:
//!
//! - `http.rs`: [`HttpRemoteStore`] (the authoritative collection) and
//!   [`HttpSnapshotSource`] (the versioned bundle, over HTTP or from a file)
//! - `probe.rs`: [`TcpConnectivity`], a reachability probe
//!
//! All HTTP calls are blocking; they run on the reconciler's background
//! thread, never on a query path.

pub mod error;
mod http;
mod probe;

pub use error::RemoteError;
pub use http::{cache_busted_url, HttpRemoteStore, HttpSnapshotSource, SnapshotLocation};
pub use probe::TcpConnectivity;
