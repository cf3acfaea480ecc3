//! Devanagari to Latin transliteration.
//!
//! Names on the roll are printed in either script. To let a query typed in
//! one script find a name printed in the other, names are romanized at index
//! time and Devanagari queries are romanized before matching.
//!
//! ## Scheme
//!
//! The romanization follows the informal spelling people actually type for
//! Marathi and Hindi names, not a scholarly scheme:
//!
//! - no diacritics or vowel length (`ा` and `अ` are both `a`)
//! - `श`/`ष` are `sh`, `च` is `ch`, `छ` is `chh`
//! - `क्ष` is `ksh`, `ज्ञ` is `dny`
//! - the inherent vowel is dropped at the end of a multi-syllable word
//!   (`राम` is `ram`, `न` stays `na`)
//! - anusvara and chandrabindu are `n`, visarga is `h`
//! - Devanagari digits become ASCII digits
//!
//! Text in Latin script passes through unchanged.

use crate::error::{MatdarError, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const VIRAMA: char = '\u{094D}';
const NUKTA: char = '\u{093C}';

/// Romanize Devanagari text.
///
/// Fails on malformed sequences (a vowel sign or virama with no consonant
/// before it) and on characters from scripts other than Latin or
/// Devanagari.
///
/// # Example
/// ```
/// use matdar_core::translit::transliterate;
/// assert_eq!(transliterate("राम").unwrap(), "ram");
/// assert_eq!(transliterate("Shyam").unwrap(), "Shyam");
/// assert!(transliterate("ाम").is_err());
/// ```
pub fn transliterate(input: &str) -> Result<String> {
    run(input, true).map_err(|reason| MatdarError::transliteration(input, reason))
}

/// Romanize Devanagari text, skipping anything that cannot be romanized.
///
/// Unsupported characters become spaces and dangling signs are dropped, so
/// this never fails. Used on the query side, where partial input is normal.
pub fn transliterate_lossy(input: &str) -> String {
    run(input, false).unwrap_or_default()
}

/// Whether the text contains any Devanagari character
pub fn contains_devanagari(text: &str) -> bool {
    text.chars().any(is_devanagari)
}

fn is_devanagari(c: char) -> bool {
    ('\u{0900}'..='\u{097F}').contains(&c)
}

/// Scripts that pass through untouched: Latin, combining diacritics,
/// general punctuation and whitespace.
fn is_passthrough(c: char) -> bool {
    c.is_ascii()
        || c.is_whitespace()
        || ('\u{00A0}'..='\u{024F}').contains(&c)
        || ('\u{0300}'..='\u{036F}').contains(&c)
        || ('\u{1E00}'..='\u{1EFF}').contains(&c)
        || ('\u{2000}'..='\u{206F}').contains(&c)
}

fn consonant(c: char) -> Option<&'static str> {
    let latin = match c {
        'क' => "k",
        'ख' => "kh",
        'ग' => "g",
        'घ' => "gh",
        'ङ' => "n",
        'च' => "ch",
        'छ' => "chh",
        'ज' => "j",
        'झ' => "jh",
        'ञ' => "n",
        'ट' => "t",
        'ठ' => "th",
        'ड' => "d",
        'ढ' => "dh",
        'ण' => "n",
        'त' => "t",
        'थ' => "th",
        'द' => "d",
        'ध' => "dh",
        'न' | 'ऩ' => "n",
        'प' => "p",
        'फ' => "ph",
        'ब' => "b",
        'भ' => "bh",
        'म' => "m",
        'य' => "y",
        'र' | 'ऱ' => "r",
        'ल' | 'ळ' | 'ऴ' => "l",
        'व' => "v",
        'श' | 'ष' => "sh",
        'स' => "s",
        'ह' => "h",
        // Precomposed nukta forms
        '\u{0958}' => "q",
        '\u{0959}' => "kh",
        '\u{095A}' => "g",
        '\u{095B}' => "z",
        '\u{095C}' => "r",
        '\u{095D}' => "rh",
        '\u{095E}' => "f",
        '\u{095F}' => "y",
        _ => return None,
    };
    Some(latin)
}

/// Consonant followed by a combining nukta
fn nukta_consonant(c: char) -> Option<&'static str> {
    match c {
        'क' => Some("q"),
        'ज' => Some("z"),
        'फ' => Some("f"),
        'ड' => Some("r"),
        'ढ' => Some("rh"),
        _ => consonant(c),
    }
}

fn independent_vowel(c: char) -> Option<&'static str> {
    let latin = match c {
        // ॲ spells the English "a" of loanwords in Marathi
        'अ' | 'आ' | 'ॲ' | 'ऄ' => "a",
        'इ' | 'ई' => "i",
        'उ' | 'ऊ' => "u",
        'ऋ' | 'ॠ' => "ri",
        'ऌ' | 'ॡ' => "li",
        'ए' | 'ऍ' | 'ऎ' => "e",
        'ऐ' => "ai",
        'ओ' | 'ऑ' | 'ऒ' => "o",
        'औ' => "au",
        'ॐ' => "om",
        _ => return None,
    };
    Some(latin)
}

fn vowel_sign(c: char) -> Option<&'static str> {
    let latin = match c {
        'ा' => "a",
        'ि' | 'ी' => "i",
        'ु' | 'ू' => "u",
        'ृ' | 'ॄ' => "ri",
        'ॢ' | 'ॣ' => "li",
        'े' | 'ॅ' | 'ॆ' => "e",
        'ै' => "ai",
        'ो' | 'ॉ' | 'ॊ' => "o",
        'ौ' => "au",
        _ => return None,
    };
    Some(latin)
}

fn modifier(c: char) -> Option<&'static str> {
    match c {
        'ं' | 'ँ' => Some("n"),
        'ः' => Some("h"),
        _ => None,
    }
}

fn digit(c: char) -> Option<char> {
    ('०'..='९')
        .contains(&c)
        .then(|| char::from(b'0' + (c as u32 - '०' as u32) as u8))
}

/// Core romanizer. `strict` turns malformed input into an error instead of
/// skipping it.
fn run(input: &str, strict: bool) -> std::result::Result<String, &'static str> {
    if !contains_devanagari(input) {
        if strict {
            if input.chars().all(is_passthrough) {
                return Ok(input.to_string());
            }
            return Err("unsupported script");
        }
        return Ok(input
            .chars()
            .map(|c| if is_passthrough(c) { c } else { ' ' })
            .collect());
    }

    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() * 2);

    // A consonant has been written and its inherent vowel is still undecided
    let mut pending_a = false;
    // The previous character was a consonant or a virama-joined cluster
    let mut after_consonant = false;
    // Syllables seen in the current word, for final schwa deletion
    let mut syllables = 0usize;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if let Some(latin) = consonant(c) {
            let joined = after_consonant && !pending_a;
            if pending_a {
                out.push('a');
            }
            if !joined {
                syllables += 1;
            }

            // क्ष and ज्ञ have conventional spellings of their own
            let cluster = match (c, next, chars.get(i + 2).copied()) {
                ('क', Some(VIRAMA), Some('ष')) => Some("ksh"),
                ('ज', Some(VIRAMA), Some('ञ')) => Some("dny"),
                _ => None,
            };

            if let Some(cluster) = cluster {
                out.push_str(cluster);
                i += 3;
            } else if next == Some(NUKTA) {
                out.push_str(nukta_consonant(c).unwrap_or(latin));
                i += 2;
            } else {
                out.push_str(latin);
                i += 1;
            }
            pending_a = true;
            after_consonant = true;
            continue;
        }

        if let Some(latin) = vowel_sign(c) {
            if !after_consonant || !pending_a {
                if strict {
                    return Err("vowel sign without a consonant");
                }
            } else {
                out.push_str(latin);
            }
            pending_a = false;
            after_consonant = false;
            i += 1;
            continue;
        }

        if c == VIRAMA {
            if !after_consonant || !pending_a {
                if strict {
                    return Err("virama without a consonant");
                }
                after_consonant = false;
            }
            pending_a = false;
            i += 1;
            continue;
        }

        if c == NUKTA {
            if strict {
                return Err("nukta without a consonant");
            }
            i += 1;
            continue;
        }

        if let Some(latin) = modifier(c) {
            if syllables == 0 {
                if strict {
                    return Err("nasal or visarga without a syllable");
                }
            } else {
                if pending_a {
                    out.push('a');
                }
                out.push_str(latin);
            }
            pending_a = false;
            after_consonant = false;
            i += 1;
            continue;
        }

        if let Some(latin) = independent_vowel(c) {
            if pending_a {
                out.push('a');
            }
            out.push_str(latin);
            syllables += 1;
            pending_a = false;
            after_consonant = false;
            i += 1;
            continue;
        }

        if matches!(c, 'ऽ' | '\u{200C}' | '\u{200D}') {
            i += 1;
            continue;
        }

        // Anything else ends the current word
        if pending_a && syllables <= 1 {
            out.push('a');
        }
        pending_a = false;
        after_consonant = false;
        syllables = 0;

        if let Some(d) = digit(c) {
            out.push(d);
        } else if matches!(c, '।' | '॥') {
            out.push(' ');
        } else if is_devanagari(c) || !is_passthrough(c) {
            if strict {
                return Err("unsupported character");
            }
            out.push(' ');
        } else {
            out.push(c);
        }
        i += 1;
    }

    if pending_a && syllables <= 1 {
        out.push('a');
    }

    Ok(out)
}

/// Memoizing transliterator shared by the threads of one index build.
///
/// Surnames and first names repeat heavily across a roll, so most lookups
/// are hits. The memo lives as long as the transliterator; an index build
/// creates one and drops it when done.
#[derive(Debug, Default)]
pub struct Transliterator {
    memo: DashMap<String, Option<String>>,
    failures: AtomicUsize,
}

impl Transliterator {
    /// Create an empty transliterator
    pub fn new() -> Self {
        Self::default()
    }

    /// Romanize `name`, remembering the outcome.
    pub fn transliterate(&self, name: &str) -> Result<String> {
        if !contains_devanagari(name) && name.is_ascii() {
            return Ok(name.to_string());
        }

        if let Some(hit) = self.memo.get(name) {
            return match hit.value() {
                Some(latin) => Ok(latin.clone()),
                None => Err(MatdarError::transliteration(name, "previously failed")),
            };
        }

        let result = transliterate(name);
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.memo
            .insert(name.to_string(), result.as_ref().ok().cloned());
        result
    }

    /// Number of distinct names that failed to transliterate
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Number of distinct names memoized
    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_names() {
        let cases = [
            ("राम", "ram"),
            ("श्याम", "shyam"),
            ("सीता", "sita"),
            ("गणेश", "ganesh"),
            ("कमल", "kamal"),
            ("महेश", "mahesh"),
            ("लक्ष्मी", "lakshmi"),
            ("ज्ञानेश्वर", "dnyaneshvar"),
            ("संजय", "sanjay"),
            ("छाया", "chhaya"),
            ("न", "na"),
            ("\u{092B}\u{093C}\u{0948}\u{091C}\u{093C}", "faiz"),
            ("\u{095E}\u{0948}\u{095B}", "faiz"),
        ];
        for (devanagari, latin) in cases {
            assert_eq!(transliterate(devanagari).unwrap(), latin, "for {}", devanagari);
        }
    }

    #[test]
    fn test_marathi_loanword_vowels() {
        assert_eq!(transliterate("ॲडम").unwrap(), "adam");
        assert_eq!(transliterate("ऄ").unwrap(), "a");
        assert_eq!(transliterate("ॲन्थनी परेरा").unwrap(), "anthani parera");
    }

    #[test]
    fn test_multi_word_and_mixed() {
        assert_eq!(transliterate("राम शिंदे").unwrap(), "ram shinde");
        assert_eq!(transliterate("राम (A1)").unwrap(), "ram (A1)");
        assert_eq!(transliterate("भाग १२").unwrap(), "bhag 12");
        assert_eq!(transliterate("राम। श्याम").unwrap(), "ram  shyam");
    }

    #[test]
    fn test_latin_passthrough() {
        assert_eq!(transliterate("Shyam Kumar").unwrap(), "Shyam Kumar");
        assert_eq!(transliterate("José").unwrap(), "José");
        assert_eq!(transliterate("").unwrap(), "");
    }

    #[test]
    fn test_malformed_input_fails() {
        assert!(transliterate("ाम").is_err());
        assert!(transliterate("्र").is_err());
        assert!(transliterate("ंक").is_err());
        // Gujarati is not supported
        assert!(transliterate("રામ").is_err());
        let err = transliterate("ाम").unwrap_err();
        assert!(matches!(err, MatdarError::TransliterationFailed { .. }));
    }

    #[test]
    fn test_lossy_never_fails() {
        assert_eq!(transliterate_lossy("ाम"), "ma");
        assert_eq!(transliterate_lossy("રામ"), "   ");
        assert_eq!(transliterate_lossy("राम"), "ram");
        assert_eq!(transliterate_lossy("ram 12"), "ram 12");
        // Unmapped characters cost only themselves
        assert_eq!(transliterate_lossy("राम ગ शिंदे"), "ram   shinde");
    }

    #[test]
    fn test_transliterator_memo() {
        let t = Transliterator::new();
        assert_eq!(t.transliterate("राम").unwrap(), "ram");
        assert_eq!(t.transliterate("राम").unwrap(), "ram");
        assert_eq!(t.len(), 1);

        assert!(t.transliterate("ाम").is_err());
        assert!(t.transliterate("ाम").is_err());
        assert_eq!(t.failures(), 1);

        // ASCII names bypass the memo
        assert_eq!(t.transliterate("Shyam").unwrap(), "Shyam");
        assert_eq!(t.len(), 2);
    }
}
