//! Search index over a canonical dataset.
//!
//! Every record gets a precomputed `search_surface`: its searchable fields,
//! plus romanized renderings of the Devanagari ones, joined in a fixed order
//! and passed through [`normalize`]. The query engine then only needs
//! substring checks against one string per record.
//!
//! ## Architecture
//!
//! - Indexes are built wholesale from a record slice and never patched
//! - A new dataset means a new [`SearchIndex`]; the old one is dropped once
//!   no in-flight query holds it
//! - Transliteration failures fall back to a lossy romanization that keeps
//!   every mappable character; they are counted, never propagated
//!
//! Above [`DEFAULT_PARALLEL_THRESHOLD`] records the build fans out over
//! rayon. Output order always equals input order.

use crate::normalize::normalize;
use crate::translit::{contains_devanagari, transliterate_lossy, Transliterator};
use crate::types::{CanonicalDataset, DatasetRevision, Record};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Record count above which index builds and queries run in parallel
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 10_000;

/// A searchable field, in surface order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Name,
    /// Romanized rendering of the name
    NameLatin,
    Id,
    Booth,
    PollingStation,
    /// Romanized rendering of a Devanagari polling station
    PollingStationLatin,
    SectionAddress,
    SectionAddressLatin,
    /// Address override from the survey
    SurveyAddress,
    SurveyAddressLatin,
    Ward,
    WardLatin,
    FatherName,
    /// Romanized rendering of the father's name
    FatherNameLatin,
}

impl SearchField {
    /// Stable label for display
    pub fn label(&self) -> &'static str {
        match self {
            SearchField::Name => "name",
            SearchField::NameLatin => "name_latin",
            SearchField::Id => "id",
            SearchField::Booth => "booth",
            SearchField::PollingStation => "polling_station",
            SearchField::PollingStationLatin => "polling_station_latin",
            SearchField::SectionAddress => "section_address",
            SearchField::SectionAddressLatin => "section_address_latin",
            SearchField::SurveyAddress => "survey_address",
            SearchField::SurveyAddressLatin => "survey_address_latin",
            SearchField::Ward => "ward",
            SearchField::WardLatin => "ward_latin",
            SearchField::FatherName => "father_name",
            SearchField::FatherNameLatin => "father_name_latin",
        }
    }
}

/// Raw searchable text of a record, in surface order.
///
/// Names are always romanized. Other fields get a romanized companion only
/// when they contain Devanagari, which normalization would otherwise strip.
///
/// Returns the fields and the number of transliteration fallbacks taken.
/// Fields that are empty are skipped.
pub fn searchable_fields(
    record: &Record,
    translit: &Transliterator,
) -> (Vec<(SearchField, String)>, usize) {
    let mut fallbacks = 0;
    let mut romanize = |text: &str| match translit.transliterate(text) {
        Ok(latin) => latin,
        Err(e) => {
            debug!(error = %e, "Transliteration failed, romanizing what is mappable");
            fallbacks += 1;
            transliterate_lossy(text)
        }
    };

    let survey_address = record
        .survey
        .as_ref()
        .and_then(|s| s.address.clone())
        .unwrap_or_default();

    let mut fields = Vec::with_capacity(14);
    fields.push((SearchField::Name, record.name.clone()));
    fields.push((SearchField::NameLatin, romanize(&record.name)));
    fields.push((SearchField::Id, record.id.as_str().to_string()));
    fields.push((SearchField::Booth, record.booth.clone()));

    let places = [
        (SearchField::PollingStation, SearchField::PollingStationLatin, &record.polling_station),
        (SearchField::SectionAddress, SearchField::SectionAddressLatin, &record.section_address),
        (SearchField::SurveyAddress, SearchField::SurveyAddressLatin, &survey_address),
        (SearchField::Ward, SearchField::WardLatin, &record.ward),
    ];
    for (field, latin_field, text) in places {
        fields.push((field, text.clone()));
        if contains_devanagari(text) {
            fields.push((latin_field, romanize(text)));
        }
    }

    fields.push((SearchField::FatherName, record.father_name.clone()));
    fields.push((SearchField::FatherNameLatin, romanize(&record.father_name)));

    fields.retain(|(_, text)| !text.trim().is_empty());
    (fields, fallbacks)
}

/// A record together with its derived search surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRecord {
    record: Record,
    search_surface: String,
}

impl IndexedRecord {
    /// Index one record. Returns the number of transliteration fallbacks.
    pub fn build(record: Record, translit: &Transliterator) -> (Self, usize) {
        let (fields, fallbacks) = searchable_fields(&record, translit);
        let joined = fields
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let indexed = IndexedRecord {
            search_surface: normalize(&joined),
            record,
        };
        (indexed, fallbacks)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Normalized text that query terms are matched against
    pub fn search_surface(&self) -> &str {
        &self.search_surface
    }

    /// Whether a required field (identifier, name, booth) is empty
    pub fn is_malformed(&self) -> bool {
        self.record.id.as_str().is_empty()
            || self.record.name.trim().is_empty()
            || self.record.booth.trim().is_empty()
    }
}

/// Statistics of one index build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub record_count: usize,

    /// Records with a field that could only be partly romanized
    pub transliteration_fallbacks: usize,

    /// Records missing a required field
    pub malformed: usize,

    /// Distinct non-ASCII names romanized during the build
    pub distinct_names: usize,

    pub build_time: Duration,
}

/// Build the index for `records`. Pure and total; order is preserved.
pub fn build_index(records: &[Record]) -> Vec<IndexedRecord> {
    build_index_with(records, DEFAULT_PARALLEL_THRESHOLD).0
}

/// Build the index, going parallel above `parallel_threshold` records.
#[instrument(skip(records), fields(records = records.len()))]
pub fn build_index_with(
    records: &[Record],
    parallel_threshold: usize,
) -> (Vec<IndexedRecord>, IndexStats) {
    let started = Instant::now();
    let translit = Transliterator::new();
    let fallbacks = AtomicUsize::new(0);

    let index_one = |record: &Record| {
        let (indexed, n) = IndexedRecord::build(record.clone(), &translit);
        if n > 0 {
            fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        indexed
    };

    let indexed: Vec<IndexedRecord> = if records.len() > parallel_threshold {
        records.par_iter().map(index_one).collect()
    } else {
        records.iter().map(index_one).collect()
    };

    let stats = IndexStats {
        record_count: indexed.len(),
        transliteration_fallbacks: fallbacks.load(Ordering::Relaxed),
        malformed: indexed.iter().filter(|r| r.is_malformed()).count(),
        distinct_names: translit.len(),
        build_time: started.elapsed(),
    };

    if stats.transliteration_fallbacks > 0 {
        warn!(
            fallbacks = stats.transliteration_fallbacks,
            "Some names were indexed without transliteration"
        );
    }

    (indexed, stats)
}

/// Immutable index over one published dataset.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    records: Vec<IndexedRecord>,
    revision: DatasetRevision,
    stats: IndexStats,
}

impl SearchIndex {
    /// Index a canonical dataset
    pub fn build(dataset: &CanonicalDataset, parallel_threshold: usize) -> Self {
        let (records, stats) = build_index_with(dataset.records(), parallel_threshold);
        info!(
            records = stats.record_count,
            generation = dataset.revision().generation,
            elapsed_ms = stats.build_time.as_millis() as u64,
            "Search index built"
        );
        SearchIndex {
            records,
            revision: dataset.revision(),
            stats,
        }
    }

    /// Index of the empty dataset
    pub fn empty() -> Self {
        Self::build(&CanonicalDataset::empty(), DEFAULT_PARALLEL_THRESHOLD)
    }

    pub fn records(&self) -> &[IndexedRecord] {
        &self.records
    }

    /// Revision of the dataset this index was built from
    pub fn revision(&self) -> DatasetRevision {
        self.revision
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
