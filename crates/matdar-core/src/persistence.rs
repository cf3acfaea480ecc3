//! Typed access to the local dataset cache.
//!
//! [`DatasetCache`] layers three well-known keys over any [`CacheStore`]:
//!
//! - `records`: the record-set blob
//! - `last_sync`: RFC 3339 timestamp of the last successful remote sync
//! - `initial_data`: whether any dataset has ever been acquired
//!
//! Absent or malformed values read as "no data"; they are logged, never
//! raised.
//!
//! ## Record Blob Format
//!
//! ```text
//! [Header: 32 bytes]
//!   - Magic: "MTDR" (4 bytes)
//!   - Version: u32 (4 bytes)
//!   - Flags: u32 (4 bytes) - compression
//!   - Record count: u64 (8 bytes)
//!   - Reserved: 12 bytes
//!
//! [Records: variable]
//!   - bincode Vec<Record>, LZ4 compressed (size-prepended) when flagged
//!
//! [Footer: 8 bytes]
//!   - CRC32 checksum of the records section: u32
//!   - Magic: "RDTM" (4 bytes)
//! ```

use crate::error::{MatdarError, Result};
use crate::store::CacheStore;
use crate::types::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Magic bytes at the start of record blobs
pub const MAGIC_HEADER: &[u8; 4] = b"MTDR";
/// Magic bytes at the end of record blobs (reversed)
pub const MAGIC_FOOTER: &[u8; 4] = b"RDTM";
/// Current record blob format version
pub const BLOB_VERSION: u32 = 1;

const HEADER_LEN: usize = 32;
const FOOTER_LEN: usize = 8;

/// Cache key of the record-set blob
pub const KEY_RECORDS: &str = "records";
/// Cache key of the last-sync timestamp
pub const KEY_LAST_SYNC: &str = "last_sync";
/// Cache key of the "initial data acquired" flag
pub const KEY_INITIAL_DATA: &str = "initial_data";

/// Flags for the blob format
#[derive(Debug, Clone, Copy)]
pub struct BlobFlags(u32);

impl BlobFlags {
    /// No compression
    pub const NONE: Self = BlobFlags(0);
    /// LZ4 compression
    pub const COMPRESSED_LZ4: Self = BlobFlags(1);

    fn is_compressed(&self) -> bool {
        self.0 & 1 != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobHeader {
    magic: [u8; 4],
    version: u32,
    flags: u32,
    record_count: u64,
    reserved: [u8; 12],
}

impl BlobHeader {
    fn new(record_count: u64, flags: BlobFlags) -> Self {
        BlobHeader {
            magic: *MAGIC_HEADER,
            version: BLOB_VERSION,
            flags: flags.0,
            record_count,
            reserved: [0; 12],
        }
    }

    fn validate(&self) -> Result<()> {
        if self.magic != *MAGIC_HEADER {
            return Err(MatdarError::CacheCorrupted {
                key: KEY_RECORDS.to_string(),
                reason: "invalid magic bytes in header".to_string(),
            });
        }
        if self.version > BLOB_VERSION {
            return Err(MatdarError::CacheVersionMismatch {
                found: self.version,
                expected: BLOB_VERSION,
            });
        }
        Ok(())
    }
}

fn corrupted(reason: impl Into<String>) -> MatdarError {
    MatdarError::CacheCorrupted {
        key: KEY_RECORDS.to_string(),
        reason: reason.into(),
    }
}

/// Encode a record set into the blob format.
pub fn encode_records(records: &[Record], compress: bool) -> Result<Vec<u8>> {
    let flags = if compress {
        BlobFlags::COMPRESSED_LZ4
    } else {
        BlobFlags::NONE
    };

    let bytes = bincode::serialize(records)?;
    let data = if compress {
        lz4_flex::compress_prepend_size(&bytes)
    } else {
        bytes
    };

    let header = BlobHeader::new(records.len() as u64, flags);
    let mut blob = bincode::serialize(&header)?;
    debug_assert_eq!(blob.len(), HEADER_LEN);
    blob.reserve(data.len() + FOOTER_LEN);
    blob.extend_from_slice(&data);
    blob.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
    blob.extend_from_slice(MAGIC_FOOTER);
    Ok(blob)
}

/// Decode a blob produced by [`encode_records`].
pub fn decode_records(blob: &[u8]) -> Result<Vec<Record>> {
    if blob.len() < HEADER_LEN + FOOTER_LEN {
        return Err(corrupted(format!("blob too short ({} bytes)", blob.len())));
    }

    let header: BlobHeader = bincode::deserialize(&blob[..HEADER_LEN])
        .map_err(|e| corrupted(format!("header: {e}")))?;
    header.validate()?;

    let data = &blob[HEADER_LEN..blob.len() - FOOTER_LEN];
    let footer = &blob[blob.len() - FOOTER_LEN..];

    if &footer[4..8] != MAGIC_FOOTER {
        return Err(corrupted("invalid footer magic bytes"));
    }

    let stored = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    let computed = crc32fast::hash(data);
    if stored != computed {
        return Err(corrupted(format!(
            "checksum mismatch: expected {stored:08x}, got {computed:08x}"
        )));
    }

    let flags = BlobFlags(header.flags);
    let decompressed;
    let payload = if flags.is_compressed() {
        decompressed = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| corrupted(format!("decompression failed: {e}")))?;
        &decompressed[..]
    } else {
        data
    };

    let records: Vec<Record> = bincode::deserialize(payload)
        .map_err(|e| corrupted(format!("deserialization failed: {e}")))?;

    if records.len() as u64 != header.record_count {
        return Err(corrupted(format!(
            "record count mismatch: header says {}, found {}",
            header.record_count,
            records.len()
        )));
    }

    Ok(records)
}

/// Typed view of the dataset cache.
///
/// ## Example
///
/// ```rust,ignore
/// use matdar_core::{DatasetCache, MemoryCacheStore};
/// use std::sync::Arc;
///
/// let cache = DatasetCache::new(Arc::new(MemoryCacheStore::new()));
/// cache.save_records(&records)?;
/// let loaded = cache.load_records();
/// ```
#[derive(Clone)]
pub struct DatasetCache {
    store: Arc<dyn CacheStore>,
    use_compression: bool,
}

impl std::fmt::Debug for DatasetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetCache")
            .field("use_compression", &self.use_compression)
            .finish()
    }
}

impl DatasetCache {
    /// Create a typed cache over `store`
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        DatasetCache {
            store,
            use_compression: true,
        }
    }

    /// Set whether to compress the record blob.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.use_compression = compress;
        self
    }

    /// Load the cached record set.
    ///
    /// An unreadable set is replaced by the store's backup of the previous
    /// one, when it keeps one. Returns `None` when absent or unreadable.
    pub fn load_records(&self) -> Option<Vec<Record>> {
        let err = match self.read_records() {
            Ok(records) => return records,
            Err(e) => e,
        };
        warn!(error = %err, "Cached record set is unreadable");

        match self.store.restore_backup(KEY_RECORDS) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to restore the previous record set");
                return None;
            }
        }
        match self.read_records() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Previous record set is unreadable too, ignoring both");
                None
            }
        }
    }

    fn read_records(&self) -> Result<Option<Vec<Record>>> {
        let Some(blob) = self.store.get(KEY_RECORDS)? else {
            debug!("No cached record set");
            return Ok(None);
        };
        let records = decode_records(&blob)?;
        info!(records = records.len(), "Loaded cached record set");
        Ok(Some(records))
    }

    /// Persist a record set, replacing the cached one.
    pub fn save_records(&self, records: &[Record]) -> Result<()> {
        let blob = encode_records(records, self.use_compression)?;
        info!(records = records.len(), bytes = blob.len(), "Saving record set to cache");
        self.store.set(KEY_RECORDS, &blob)
    }

    /// Timestamp of the last successful remote sync
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        let bytes = match self.store.get(KEY_LAST_SYNC) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read last sync timestamp");
                return None;
            }
        };

        let parsed = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|t| t.with_timezone(&Utc));
        if parsed.is_none() {
            warn!("Cached last sync timestamp is malformed, ignoring it");
        }
        parsed
    }

    /// Record the last successful remote sync
    pub fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.set(KEY_LAST_SYNC, at.to_rfc3339().as_bytes())
    }

    /// Whether initial data has ever been acquired on this device
    pub fn initial_data_acquired(&self) -> bool {
        match self.store.get(KEY_INITIAL_DATA) {
            Ok(Some(bytes)) => matches!(bytes.as_slice(), b"1" | b"true"),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to read initial data flag");
                false
            }
        }
    }

    /// Set the "initial data acquired" flag
    pub fn set_initial_data_acquired(&self, acquired: bool) -> Result<()> {
        let value: &[u8] = if acquired { b"1" } else { b"0" };
        self.store.set(KEY_INITIAL_DATA, value)
    }

    /// Remove every cached value
    pub fn clear(&self) -> Result<()> {
        self.store.remove(KEY_RECORDS)?;
        self.store.remove(KEY_LAST_SYNC)?;
        self.store.remove(KEY_INITIAL_DATA)?;
        Ok(())
    }
}
