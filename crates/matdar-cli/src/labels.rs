//! Built-in label tables for terminal output.

use matdar_core::{LabelCache, Translator};

pub type Labels = LabelCache<StaticTranslator>;

/// Translator backed by compiled-in English and Marathi tables.
pub struct StaticTranslator;

const ENGLISH: &[(&str, &str)] = &[
    ("title", "Matdar Status"),
    ("available", "Data available"),
    ("provenance", "Source"),
    ("records", "Records"),
    ("generation", "Generation"),
    ("fingerprint", "Fingerprint"),
    ("last_sync", "Last sync"),
    ("phase", "Sync phase"),
    ("online", "Online"),
    ("last_error", "Last error"),
    ("never", "never"),
    ("yes", "yes"),
    ("no", "no"),
    ("no_data", "No voter data yet. Run 'matdar sync' while online or 'matdar import <file>'."),
    ("no_results", "No matching voters."),
    ("booth", "Booth"),
];

const MARATHI: &[(&str, &str)] = &[
    ("title", "मतदार स्थिती"),
    ("available", "माहिती उपलब्ध"),
    ("provenance", "स्रोत"),
    ("records", "नोंदी"),
    ("last_sync", "शेवटचे सिंक"),
    ("online", "ऑनलाइन"),
    ("never", "कधीच नाही"),
    ("yes", "होय"),
    ("no", "नाही"),
    ("no_data", "अजून मतदार माहिती नाही. ऑनलाइन असताना 'matdar sync' चालवा."),
    ("no_results", "जुळणारे मतदार नाहीत."),
    ("booth", "बूथ"),
];

impl Translator for StaticTranslator {
    fn translate(&self, key: &str, language: &str) -> anyhow::Result<String> {
        let table = match language {
            "en" => ENGLISH,
            "mr" => MARATHI,
            other => anyhow::bail!("unsupported language {other:?}"),
        };
        table
            .iter()
            .chain(ENGLISH)
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
            .ok_or_else(|| anyhow::anyhow!("no label for {key:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marathi_falls_back_to_english() {
        let labels = Labels::new(StaticTranslator, "mr");
        assert_eq!(labels.label("yes"), "होय");
        assert_eq!(labels.label("generation"), "Generation");
        assert_eq!(labels.label("missing"), "missing");
    }

    #[test]
    fn test_unknown_language_returns_keys() {
        let labels = Labels::new(StaticTranslator, "xx");
        assert_eq!(labels.label("title"), "title");
        labels.set_language("en");
        assert_eq!(labels.label("title"), "Matdar Status");
    }
}
