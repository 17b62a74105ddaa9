//! Title casing with exact-match overrides.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static MIXED_CASE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z][A-Z]|[A-Z][a-z]").unwrap());

/// Capitalize the first letter of every alphabetic run and lower-case the
/// rest ("o'neil" becomes "O'Neil").
pub fn title_word(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut in_word = false;
    for c in word.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Title-case `text`.
///
/// Words matching an entry of `overrides` case-insensitively take that
/// entry's exact form, as does the whole text. With `preserve_mixed_case`,
/// text that already mixes cases ("McFly", "DeVille") is returned as-is
/// unless it is itself overridden, and a single word is never recased.
pub fn custom_title_case(text: &str, overrides: &[String], preserve_mixed_case: bool) -> String {
    if text.is_empty() {
        return String::new();
    }
    let override_map: HashMap<String, &str> = overrides
        .iter()
        .map(|o| (o.to_lowercase(), o.as_str()))
        .collect();
    let lower = text.to_lowercase();

    if let Some(exact) = override_map.get(&lower) {
        return exact.to_string();
    }
    if preserve_mixed_case && MIXED_CASE.is_match(text) {
        return text.to_string();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return text.to_string();
    }
    let single = words.len() == 1;
    words
        .iter()
        .map(|word| match override_map.get(&word.to_lowercase()) {
            Some(exact) => exact.to_string(),
            None if preserve_mixed_case && single => word.to_string(),
            None => title_word(word),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides() -> Vec<String> {
        vec!["BrutalX".to_string(), "HD".to_string(), "BBC One".to_string()]
    }

    #[test]
    fn test_title_word() {
        assert_eq!(title_word("hello"), "Hello");
        assert_eq!(title_word("o'neil"), "O'Neil");
        assert_eq!(title_word("SHOUTING"), "Shouting");
        assert_eq!(title_word("4k"), "4K");
    }

    #[test]
    fn test_overrides_per_word_and_whole() {
        assert_eq!(custom_title_case("brutalx presents hd clips", &overrides(), false), "BrutalX Presents HD Clips");
        assert_eq!(custom_title_case("bbc one", &overrides(), false), "BBC One");
    }

    #[test]
    fn test_mixed_case_preserved() {
        assert_eq!(custom_title_case("McFly", &[], true), "McFly");
        assert_eq!(custom_title_case("DeVille Studios", &[], true), "DeVille Studios");
        assert_eq!(custom_title_case("mcfly", &["McFly".to_string()], true), "McFly");
        // Without the flag, mixed case is normalized.
        assert_eq!(custom_title_case("McFly", &[], false), "Mcfly");
    }

    #[test]
    fn test_single_lowercase_word_kept_when_preserving() {
        assert_eq!(custom_title_case("jane", &[], true), "jane");
        assert_eq!(custom_title_case("jane doe", &[], true), "Jane Doe");
    }
}
