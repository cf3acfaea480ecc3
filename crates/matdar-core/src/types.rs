//! Core data types for Matdar.
//!
//! This module defines the fundamental data structures used throughout the
//! reconciliation, indexing and query system. These types are designed to be:
//!
//! - **Serializable**: For the cache blob and JSON output
//! - **Explicit**: Every field of a registry entry is enumerated; absent
//!   values are empty strings or `None`, never guessed at runtime
//! - **Immutable once published**: A [`CanonicalDataset`] is never patched,
//!   only replaced wholesale

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a person in the registry.
///
/// Usually the external registry number (EPIC). Records that arrive without
/// one get a synthetic identifier, see [`RecordId::synthetic`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Prefix that marks identifiers generated during import
    pub const SYNTHETIC_PREFIX: char = '~';

    /// Create a record ID from an external registry number
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    /// Create a synthetic ID from a batch namespace and a position in that batch.
    ///
    /// The result is deterministic, and unique across batches as long as the
    /// namespaces differ.
    pub fn synthetic(batch: &str, position: usize) -> Self {
        RecordId(format!("{}{}-{}", Self::SYNTHETIC_PREFIX, batch, position))
    }

    /// Whether this identifier was generated rather than supplied
    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with(Self::SYNTHETIC_PREFIX)
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

/// Stance recorded by a field-worker survey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportStatus {
    Supporter,
    Neutral,
    Opposed,
    #[default]
    Unknown,
}

impl SupportStatus {
    /// Parse the loose labels used by survey exports
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "supporter" | "support" | "yes" | "favour" | "favor" => SupportStatus::Supporter,
            "neutral" | "undecided" => SupportStatus::Neutral,
            "opposed" | "oppose" | "no" | "against" => SupportStatus::Opposed,
            _ => SupportStatus::Unknown,
        }
    }
}

/// Optional field-worker survey attached to a person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyRecord {
    /// Address reported during the survey, overriding the roll address
    pub address: Option<String>,
    pub income: Option<String>,
    pub education: Option<String>,
    pub occupation: Option<String>,
    pub caste: Option<String>,
    pub political_affiliation: Option<String>,
    pub issues: Vec<String>,
    pub support: SupportStatus,
    /// Field-worker the household is assigned to
    pub assigned_to: Option<String>,
}

/// One person on the voter roll.
///
/// ## Design Notes
///
/// - Text fields default to the empty string when the source omits them;
///   such records are still indexed and searchable by what they do have
/// - `booth` is kept as text since filters compare it textually
/// - Field order here is not the search order; see the indexer for that
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Registry number or synthetic placeholder
    pub id: RecordId,

    /// Serial number within the printed roll
    pub serial_no: String,

    /// Full name as printed (Latin or Devanagari script)
    pub name: String,

    pub age: Option<u16>,

    pub gender: String,

    /// Booth (part) number
    pub booth: String,

    /// Polling-station address
    pub polling_station: String,

    /// Administrative ward label
    pub ward: String,

    /// Free-form "list-section address" of the roll
    pub section_address: String,

    /// Father's (or husband's) name
    pub father_name: String,

    pub phone: String,

    pub survey: Option<SurveyRecord>,
}

impl Record {
    /// Create a record with the identifying fields set.
    pub fn new(id: impl Into<RecordId>, name: impl Into<String>, booth: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            name: name.into(),
            booth: booth.into(),
            ..Default::default()
        }
    }

    /// Set the polling-station address
    pub fn with_polling_station(mut self, address: impl Into<String>) -> Self {
        self.polling_station = address.into();
        self
    }

    /// Set the section address
    pub fn with_section_address(mut self, address: impl Into<String>) -> Self {
        self.section_address = address.into();
        self
    }

    /// Set the ward label
    pub fn with_ward(mut self, ward: impl Into<String>) -> Self {
        self.ward = ward.into();
        self
    }

    /// Set the father's name
    pub fn with_father_name(mut self, name: impl Into<String>) -> Self {
        self.father_name = name.into();
        self
    }

    /// Set the age
    pub fn with_age(mut self, age: u16) -> Self {
        self.age = Some(age);
        self
    }

    /// Set the phone number
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }

    /// The address to show: the survey override when present, else the section address
    pub fn display_address(&self) -> &str {
        self.survey
            .as_ref()
            .and_then(|s| s.address.as_deref())
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(&self.section_address)
    }

    /// Content fingerprint of this record (all fields, identifier included).
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        // Unit separators keep ("ab", "c") distinct from ("a", "bc")
        let mut field = |s: &str| {
            hasher.update(s.as_bytes());
            hasher.update(&[0x1f]);
        };
        field(self.id.as_str());
        field(&self.serial_no);
        field(&self.name);
        field(&self.age.map(|a| a.to_string()).unwrap_or_default());
        field(&self.gender);
        field(&self.booth);
        field(&self.polling_station);
        field(&self.ward);
        field(&self.section_address);
        field(&self.father_name);
        field(&self.phone);
        if let Some(survey) = &self.survey {
            field(survey.address.as_deref().unwrap_or(""));
            field(survey.income.as_deref().unwrap_or(""));
            field(survey.education.as_deref().unwrap_or(""));
            field(survey.occupation.as_deref().unwrap_or(""));
            field(survey.caste.as_deref().unwrap_or(""));
            field(survey.political_affiliation.as_deref().unwrap_or(""));
            for issue in &survey.issues {
                field(issue);
            }
            field(&format!("{:?}", survey.support));
            field(survey.assigned_to.as_deref().unwrap_or(""));
        }
        hasher.finalize()
    }
}

/// Where a canonical dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Nothing was available
    Empty,
    /// The static snapshot shipped with (or fetched for) the application
    BundledSnapshot,
    /// The locally persisted cache
    LocalCache,
    /// The remote authoritative store
    Remote,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Empty => write!(f, "empty"),
            Provenance::BundledSnapshot => write!(f, "bundled_snapshot"),
            Provenance::LocalCache => write!(f, "local_cache"),
            Provenance::Remote => write!(f, "remote"),
        }
    }
}

/// Order-independent content fingerprint of a record set.
///
/// The high half folds the sorted identifiers, the low half folds the
/// per-record fingerprints in identifier order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DatasetFingerprint(pub u64);

impl DatasetFingerprint {
    /// Compute the fingerprint of a record set
    pub fn of(records: &[Record]) -> Self {
        let mut keyed: Vec<(&str, u32)> = records
            .iter()
            .map(|r| (r.id.as_str(), r.fingerprint()))
            .collect();
        keyed.sort_unstable();

        let mut ids = crc32fast::Hasher::new();
        let mut contents = crc32fast::Hasher::new();
        for (id, fp) in keyed {
            ids.update(id.as_bytes());
            ids.update(&[0x1f]);
            contents.update(&fp.to_le_bytes());
        }
        DatasetFingerprint((u64::from(ids.finalize()) << 32) | u64::from(contents.finalize()))
    }
}

impl fmt::Display for DatasetFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Revision marker of a published dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRevision {
    /// Monotonic publish counter within this process
    pub generation: u64,

    /// Number of records in the dataset
    pub record_count: usize,

    /// Last successful sync with the remote store, if any
    pub last_sync: Option<DateTime<Utc>>,

    /// Content fingerprint of the record set
    pub fingerprint: DatasetFingerprint,
}

/// The currently active ordered collection of records.
///
/// Exactly one dataset is active at a time. It is shared behind an `Arc` and
/// never mutated; a newer dataset replaces it wholesale.
#[derive(Debug, Clone)]
pub struct CanonicalDataset {
    records: Vec<Record>,
    provenance: Provenance,
    revision: DatasetRevision,
}

impl CanonicalDataset {
    /// Create a dataset, computing its fingerprint.
    pub fn new(
        records: Vec<Record>,
        provenance: Provenance,
        generation: u64,
        last_sync: Option<DateTime<Utc>>,
    ) -> Self {
        let revision = DatasetRevision {
            generation,
            record_count: records.len(),
            last_sync,
            fingerprint: DatasetFingerprint::of(&records),
        };
        CanonicalDataset {
            records,
            provenance,
            revision,
        }
    }

    /// An empty dataset
    pub fn empty() -> Self {
        Self::new(Vec::new(), Provenance::Empty, 0, None)
    }

    /// Records in insertion order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn revision(&self) -> DatasetRevision {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Phase of the most recent sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Syncing => write!(f, "syncing"),
            SyncPhase::Success => write!(f, "success"),
            SyncPhase::Error => write!(f, "error"),
        }
    }
}

/// Process-wide sync status.
///
/// Written only by the reconciler; everything else reads copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Last successful sync with the remote store
    pub last_sync: Option<DateTime<Utc>>,

    pub phase: SyncPhase,

    /// Whether the remote store was reachable at the last probe
    pub online: bool,

    /// Whether any source has produced records
    pub available: bool,

    /// Kind of the last failure, cleared on the next success
    pub last_error: Option<ErrorKind>,

    /// Human-readable message of the last failure
    pub last_error_message: Option<String>,
}
