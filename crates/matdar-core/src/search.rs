//! Query engine over a [`SearchIndex`].
//!
//! A query is a free-text string plus two structured filters and a page:
//!
//! - every normalized term must occur in the record's search surface
//!   (conjunctive, substring, order-independent)
//! - the booth filter keeps records whose booth is in the selected set
//! - the polling-station filter is a case-insensitive substring match
//!
//! Filtering never reorders: results follow dataset insertion order, and
//! pages are contiguous slices of the filtered sequence.
//!
//! ## Performance
//!
//! Terms are compiled once per query into an Aho-Corasick automaton, so each
//! surface is scanned once regardless of the number of terms. Large indexes
//! are filtered in parallel with rayon.

use crate::index::{
    searchable_fields, IndexedRecord, SearchField, SearchIndex, DEFAULT_PARALLEL_THRESHOLD,
};
use crate::normalize::{normalize, search_terms};
use crate::translit::Transliterator;
use crate::types::Record;
use aho_corasick::AhoCorasick;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Page size used when a query asks for zero
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// A search request.
///
/// Pages are 1-based; page 0 is read as page 1.
///
/// # Example
/// ```
/// use matdar_core::Query;
/// let query = Query::text("shyam")
///     .with_booths(["7", "9"])
///     .with_polling_station("school")
///     .page(2)
///     .page_size(25);
/// assert_eq!(query.effective_page(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Free-text search string
    pub text: String,

    /// Selected booth numbers; empty means all booths
    pub booths: BTreeSet<String>,

    /// Polling-station substring filter
    pub polling_station: Option<String>,

    pub page: usize,

    pub page_size: usize,
}

impl Query {
    /// Query everything, first page
    pub fn all() -> Self {
        Query {
            page: 1,
            ..Default::default()
        }
    }

    /// Free-text query, first page
    pub fn text(text: impl Into<String>) -> Self {
        Query {
            text: text.into(),
            ..Self::all()
        }
    }

    /// Restrict to the given booth numbers
    pub fn with_booths<I, S>(mut self, booths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.booths.extend(
            booths
                .into_iter()
                .map(|b| b.into().trim().to_string())
                .filter(|b| !b.is_empty()),
        );
        self
    }

    /// Restrict to polling stations containing `station`
    pub fn with_polling_station(mut self, station: impl Into<String>) -> Self {
        let station = station.into();
        self.polling_station = (!station.trim().is_empty()).then_some(station);
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Page number, at least 1
    pub fn effective_page(&self) -> usize {
        self.page.max(1)
    }

    /// Page size, [`DEFAULT_PAGE_SIZE`] when unset
    pub fn effective_page_size(&self) -> usize {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPage {
    /// Records on this page, in dataset order
    pub records: Vec<Record>,

    /// Matches across all pages
    pub total_matched: usize,

    pub page: usize,

    pub page_size: usize,
}

impl QueryPage {
    fn empty(query: &Query) -> Self {
        QueryPage {
            records: Vec::new(),
            total_matched: 0,
            page: query.effective_page(),
            page_size: query.effective_page_size(),
        }
    }

    /// Number of pages needed for all matches
    pub fn page_count(&self) -> usize {
        self.total_matched.div_ceil(self.page_size.max(1))
    }

    /// Whether a later page has results
    pub fn has_next(&self) -> bool {
        self.page < self.page_count()
    }
}

/// Compiled conjunctive term matcher.
struct TermMatcher {
    terms: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl TermMatcher {
    fn new(text: &str) -> Self {
        let terms = search_terms(text);
        // Past 64 terms the bitmask below does not fit; fall back to contains
        let automaton = if terms.is_empty() || terms.len() > 64 {
            None
        } else {
            AhoCorasick::new(&terms).ok()
        };
        TermMatcher { terms, automaton }
    }

    fn matches_all(&self) -> bool {
        self.terms.is_empty()
    }

    /// Whether every term occurs in `haystack`
    fn matches(&self, haystack: &str) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        let Some(automaton) = &self.automaton else {
            return self.terms.iter().all(|t| haystack.contains(t.as_str()));
        };

        let want: u64 = if self.terms.len() == 64 {
            u64::MAX
        } else {
            (1u64 << self.terms.len()) - 1
        };
        let mut seen = 0u64;
        for m in automaton.find_overlapping_iter(haystack) {
            seen |= 1u64 << m.pattern().as_usize();
            if seen == want {
                return true;
            }
        }
        false
    }

    /// Terms found in `haystack`
    fn found_in<'a>(&'a self, haystack: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.terms.iter().filter(move |t| haystack.contains(t.as_str()))
    }
}

/// Booth and polling-station filters, prepared once per query.
struct StructuredFilter<'q> {
    booths: &'q BTreeSet<String>,
    station_lower: Option<String>,
}

impl<'q> StructuredFilter<'q> {
    fn new(query: &'q Query) -> Self {
        StructuredFilter {
            booths: &query.booths,
            station_lower: query
                .polling_station
                .as_ref()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
        }
    }

    fn matches(&self, record: &Record) -> bool {
        if !self.booths.is_empty() && !self.booths.contains(record.booth.trim()) {
            return false;
        }
        match &self.station_lower {
            Some(station) => record.polling_station.to_lowercase().contains(station.as_str()),
            None => true,
        }
    }
}

fn paginate(matched: Vec<&Record>, query: &Query) -> QueryPage {
    let page = query.effective_page();
    let page_size = query.effective_page_size();
    let total_matched = matched.len();

    let start = (page - 1).saturating_mul(page_size);
    let records = if start >= total_matched {
        Vec::new()
    } else {
        let end = start.saturating_add(page_size).min(total_matched);
        matched[start..end].iter().map(|r| (*r).clone()).collect()
    };

    QueryPage {
        records,
        total_matched,
        page,
        page_size,
    }
}

/// Run a query against indexed records.
pub fn execute(index: &[IndexedRecord], query: &Query) -> QueryPage {
    execute_with(index, query, DEFAULT_PARALLEL_THRESHOLD)
}

/// Run a query, filtering in parallel above `parallel_threshold` records.
pub fn execute_with(
    index: &[IndexedRecord],
    query: &Query,
    parallel_threshold: usize,
) -> QueryPage {
    if index.is_empty() {
        return QueryPage::empty(query);
    }

    let terms = TermMatcher::new(&query.text);
    let filter = StructuredFilter::new(query);
    let keep = |r: &&IndexedRecord| {
        filter.matches(r.record()) && terms.matches(r.search_surface())
    };

    let matched: Vec<&Record> = if index.len() > parallel_threshold {
        index.par_iter().filter(keep).map(|r| r.record()).collect()
    } else {
        index.iter().filter(keep).map(|r| r.record()).collect()
    };

    debug!(
        terms = terms.terms.len(),
        matched = matched.len(),
        match_all = terms.matches_all(),
        "Query executed"
    );
    paginate(matched, query)
}

/// Run a query against a [`SearchIndex`]
pub fn search(index: &SearchIndex, query: &Query) -> QueryPage {
    execute(index.records(), query)
}

/// A term found in one field, for live highlighting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub field: SearchField,
    pub term: String,
}

/// Term matching over raw record fields.
///
/// Works without an index: each field is normalized on the fly. Since terms
/// never contain spaces and the surface joins fields with spaces, a record
/// matches here exactly when it matches its indexed surface.
pub struct FieldMatcher {
    terms: TermMatcher,
    translit: Transliterator,
}

impl std::fmt::Debug for FieldMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMatcher")
            .field("terms", &self.terms.terms)
            .finish()
    }
}

impl FieldMatcher {
    pub fn new(text: &str) -> Self {
        FieldMatcher {
            terms: TermMatcher::new(text),
            translit: Transliterator::new(),
        }
    }

    /// Normalized terms of the query
    pub fn terms(&self) -> &[String] {
        &self.terms.terms
    }

    fn normalized_fields(&self, record: &Record) -> Vec<(SearchField, String)> {
        let (fields, _) = searchable_fields(record, &self.translit);
        fields
            .into_iter()
            .map(|(field, text)| (field, normalize(&text)))
            .collect()
    }

    /// Whether every term occurs in some field of `record`
    pub fn matches(&self, record: &Record) -> bool {
        if self.terms.matches_all() {
            return true;
        }
        let fields = self.normalized_fields(record);
        self.terms
            .terms
            .iter()
            .all(|term| fields.iter().any(|(_, text)| text.contains(term.as_str())))
    }

    /// Every (field, term) occurrence in `record`
    pub fn highlights(&self, record: &Record) -> Vec<Highlight> {
        let mut highlights = Vec::new();
        for (field, text) in self.normalized_fields(record) {
            for term in self.terms.found_in(&text) {
                highlights.push(Highlight {
                    field,
                    term: term.clone(),
                });
            }
        }
        highlights
    }
}

/// Run a query straight over records, for when no index is available.
pub fn execute_unindexed(records: &[Record], query: &Query) -> QueryPage {
    let matcher = FieldMatcher::new(&query.text);
    let filter = StructuredFilter::new(query);
    let matched: Vec<&Record> = records
        .iter()
        .filter(|r| filter.matches(r) && matcher.matches(r))
        .collect();
    paginate(matched, query)
}

/// Distinct booth numbers in the index, numeric ones first in numeric order.
pub fn booths(index: &SearchIndex) -> Vec<String> {
    let distinct: BTreeSet<&str> = index
        .records()
        .iter()
        .map(|r| r.record().booth.trim())
        .filter(|b| !b.is_empty())
        .collect();

    let mut booths: Vec<String> = distinct.into_iter().map(str::to_string).collect();
    booths.sort_by(|a, b| {
        match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        }
    });
    booths
}
