//! Ignore-term filtering of extracted items.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::extract::ExtractedRecord;

/// A configured term that matched an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreMatch {
    pub term: String,
    pub field: String,
    pub value: String,
}

/// Compiled ignore terms. Each term matches case-insensitively on word
/// boundaries, as written or with spaces turned into hyphens.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    terms: Vec<(String, Regex)>,
}

impl IgnoreFilter {
    pub fn new(terms: &[String]) -> Self {
        let terms = terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .filter_map(|term| {
                let plain = regex::escape(&term);
                let hyphenated = regex::escape(&term.replace(' ', "-"));
                let source = format!(r"\b(?:{}|{})\b", plain, hyphenated);
                match RegexBuilder::new(&source).case_insensitive(true).build() {
                    Ok(re) => Some((term, re)),
                    Err(e) => {
                        warn!("Unusable ignore term '{}': {}", term, e);
                        None
                    }
                }
            })
            .collect();
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// First ignore term found in any string of `record`, in field order.
    pub fn check(&self, record: &ExtractedRecord) -> Option<IgnoreMatch> {
        if self.terms.is_empty() {
            return None;
        }
        for (field, value) in record.iter() {
            for text in value.iter() {
                if let Some((term, _)) = self.terms.iter().find(|(_, re)| re.is_match(text)) {
                    return Some(IgnoreMatch {
                        term: term.clone(),
                        field: field.clone(),
                        value: text.to_string(),
                    });
                }
            }
        }
        None
    }
}
