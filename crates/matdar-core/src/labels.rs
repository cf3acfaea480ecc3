//! Cache of translated UI labels.
//!
//! Translation lookups go to an external service through [`Translator`].
//! The [`LabelCache`] in front of it is owned by whoever creates it; there is
//! no process-global cache. Entries are keyed by (language, key) and the
//! whole cache is emptied when the active language changes or when it grows
//! past its capacity.

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

/// The external translation service.
pub trait Translator: Send + Sync {
    /// Translate `key` into `language`.
    fn translate(&self, key: &str, language: &str) -> anyhow::Result<String>;
}

/// Language used when none is configured
pub const DEFAULT_LANGUAGE: &str = "en";

/// Concurrent cache of label translations.
pub struct LabelCache<T: Translator> {
    translator: T,
    language: RwLock<String>,
    entries: DashMap<(String, String), String>,
    capacity: Option<usize>,
}

impl<T: Translator> LabelCache<T> {
    /// Create an unbounded cache for `language`
    pub fn new(translator: T, language: impl Into<String>) -> Self {
        LabelCache {
            translator,
            language: RwLock::new(language.into()),
            entries: DashMap::new(),
            capacity: None,
        }
    }

    /// Bound the number of cached entries; the cache is cleared when full
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    pub fn language(&self) -> String {
        self.language.read().clone()
    }

    /// Switch language, dropping every cached entry
    pub fn set_language(&self, language: impl Into<String>) {
        let language = language.into();
        let mut current = self.language.write();
        if *current != language {
            debug!(from = %current, to = %language, "Label language changed");
            *current = language;
            self.entries.clear();
        }
    }

    /// Label for `key` in the active language.
    ///
    /// Failed lookups return the key itself and are not cached.
    pub fn label(&self, key: &str) -> String {
        let language = self.language();
        let cache_key = (language, key.to_string());
        if let Some(hit) = self.entries.get(&cache_key) {
            return hit.value().clone();
        }

        match self.translator.translate(key, &cache_key.0) {
            Ok(label) => {
                if let Some(capacity) = self.capacity {
                    if self.entries.len() >= capacity {
                        debug!(capacity, "Label cache full, clearing");
                        self.entries.clear();
                    }
                }
                self.entries.insert(cache_key, label.clone());
                label
            }
            Err(e) => {
                warn!(key, language = %cache_key.0, error = %e, "Label translation failed");
                key.to_string()
            }
        }
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTranslator {
        calls: AtomicUsize,
    }

    impl Translator for CountingTranslator {
        fn translate(&self, key: &str, language: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match (key, language) {
                ("search", "mr") => Ok("शोधा".to_string()),
                ("search", "en") => Ok("Search".to_string()),
                _ => anyhow::bail!("no translation for {key}"),
            }
        }
    }

    #[test]
    fn test_lookups_are_cached() {
        let cache = LabelCache::new(CountingTranslator::default(), DEFAULT_LANGUAGE);
        assert_eq!(cache.label("search"), "Search");
        assert_eq!(cache.label("search"), "Search");
        assert_eq!(cache.translator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_language_change_clears() {
        let cache = LabelCache::new(CountingTranslator::default(), "en");
        cache.label("search");
        cache.set_language("mr");
        assert!(cache.is_empty());
        assert_eq!(cache.label("search"), "शोधा");
        assert_eq!(cache.language(), "mr");

        // Same language again keeps entries
        cache.set_language("mr");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failures_fall_back_to_key() {
        let cache = LabelCache::new(CountingTranslator::default(), "en");
        assert_eq!(cache.label("booth"), "booth");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_bound() {
        struct Echo;
        impl Translator for Echo {
            fn translate(&self, key: &str, _language: &str) -> anyhow::Result<String> {
                Ok(key.to_uppercase())
            }
        }

        let cache = LabelCache::new(Echo, "en").with_capacity(2);
        cache.label("a");
        cache.label("b");
        cache.label("c");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.label("c"), "C");

        cache.clear();
        assert!(cache.is_empty());
    }
}
