//! Text normalization and n-gram splitting.
//!
//! Both the indexing side and the query side run every string through
//! [`normalize`] and [`ngrams`] with the same [`EngineConfig`]; a term and a
//! query only share n-grams if they were normalized identically.

use std::collections::HashMap;

use crate::config::EngineConfig;

/// Lowercase `text`, keep allowed alphanumerics and collapse everything
/// else into single spaces.
pub fn normalize(text: &str, config: &EngineConfig) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        if is_allowed(c, config) {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }

    out
}

fn is_allowed(c: char, config: &EngineConfig) -> bool {
    if config.allow_non_latin {
        c.is_alphanumeric()
    } else {
        c.is_ascii_alphanumeric() || (c.is_alphabetic() && is_latin_letter(c))
    }
}

/// Latin-1 Supplement, Latin Extended-A/B and Latin Extended Additional.
fn is_latin_letter(c: char) -> bool {
    matches!(c, '\u{00C0}'..='\u{024F}' | '\u{1E00}'..='\u{1EFF}')
}

/// Split an already normalized string into padded n-grams with their
/// multiplicities. Returns the counts and the total number of n-grams.
pub fn ngrams(
    normalized: &str,
    config: &EngineConfig,
) -> (HashMap<String, u32>, u32) {
    let mut counts = HashMap::new();
    if normalized.is_empty() {
        return (counts, 0);
    }

    let n = config.ngram_size;
    let pad = std::iter::repeat_n(config.padding, n.saturating_sub(1));
    let chars: Vec<char> = pad
        .clone()
        .chain(normalized.chars())
        .chain(pad)
        .collect();

    let mut total = 0;
    for window in chars.windows(n) {
        *counts.entry(window.iter().collect::<String>()).or_insert(0) += 1;
        total += 1;
    }

    (counts, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_punctuation() {
        let config = EngineConfig::default();
        assert_eq!(normalize("  Alice,  KING!! ", &config), "alice king");
        assert_eq!(normalize("O'Neil-Smith", &config), "o neil smith");
    }

    #[test]
    fn keeps_latin_diacritics() {
        let config = EngineConfig::default();
        assert_eq!(normalize("Ångström Café", &config), "ångström café");
    }

    #[test]
    fn drops_non_latin_by_default() {
        let config = EngineConfig::default();
        assert_eq!(normalize("tokyo 東京", &config), "tokyo");

        let config = EngineConfig {
            allow_non_latin: true,
            ..EngineConfig::default()
        };
        assert_eq!(normalize("tokyo 東京", &config), "tokyo 東京");
    }

    #[test]
    fn empty_after_filtering() {
        let config = EngineConfig::default();
        assert_eq!(normalize("!!! ---", &config), "");
        let (grams, total) = ngrams("", &config);
        assert!(grams.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn trigrams_are_padded() {
        let config = EngineConfig::default();
        let (grams, total) = ngrams("bob", &config);
        assert_eq!(total, 5);
        for g in ["$$b", "$bo", "bob", "ob$", "b$$"] {
            assert_eq!(grams.get(g), Some(&1), "missing {g}");
        }
    }

    #[test]
    fn repeated_ngrams_are_counted() {
        let config = EngineConfig {
            ngram_size: 1,
            ..EngineConfig::default()
        };
        let (grams, total) = ngrams("aab", &config);
        assert_eq!(total, 3);
        assert_eq!(grams.get("a"), Some(&2));
        assert_eq!(grams.get("b"), Some(&1));
    }
}
