//! Metadata finalization: cross-field entity dedup, casing, filenames and
//! the sidecar document.

pub mod casing;
pub mod filename;
pub mod nfo;

pub use casing::custom_title_case;
pub use filename::construct_filename;
pub use nfo::{nfo_path, render_nfo, write_nfo};

use serde::Serialize;

use crate::config::Settings;
use crate::extract::{dedup_case_insensitive, ExtractedRecord};

pub const UNTITLED: &str = "Untitled";

/// Casing overrides from the run settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseOverrides {
    /// Titles and entity names.
    pub general: Vec<String>,
    /// Applied to tags on top of `general`.
    pub tags: Vec<String>,
}

impl CaseOverrides {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            general: settings.case_overrides.clone(),
            tags: settings.tag_case_overrides.clone(),
        }
    }

    fn for_tags(&self) -> Vec<String> {
        self.general.iter().chain(self.tags.iter()).cloned().collect()
    }
}

/// Canonical record handed to the sidecar writer and the filename builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalMetadata {
    pub title: String,
    pub url: String,
    pub date: String,
    pub code: String,
    pub actors: Vec<String>,
    pub studios: Vec<String>,
    pub tags: Vec<String>,
    pub description: String,
    pub image: String,
}

/// First non-empty scalar among `names`.
fn first_text(record: &ExtractedRecord, names: &[&str]) -> String {
    names
        .iter()
        .map(|name| record.text(name).trim())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Entity names with leading `#` markers stripped, blanks dropped and
/// case-insensitive repeats removed.
fn entities(values: impl IntoIterator<Item = String>) -> Vec<String> {
    dedup_case_insensitive(
        values
            .into_iter()
            .map(|v| v.trim().trim_start_matches('#').trim().to_string())
            .filter(|v| !v.is_empty())
            .collect(),
    )
}

/// Produce the canonical metadata for an item.
///
/// Entity classes are deduplicated with precedence actors > studios > tags
/// on case-folded forms, then cased. Running the result back through
/// `finalize` yields the same entity sets.
pub fn finalize(record: &ExtractedRecord, overrides: &CaseOverrides) -> FinalMetadata {
    let actors = entities(record.list("actors"));
    let studios = entities(record.list("studios").into_iter().chain(record.list("studio")));
    let tags = entities(record.list("tags"));

    let actor_keys: Vec<String> = actors.iter().map(|a| a.to_lowercase()).collect();
    let studios: Vec<String> = studios
        .into_iter()
        .filter(|s| !actor_keys.contains(&s.to_lowercase()))
        .collect();
    let studio_keys: Vec<String> = studios.iter().map(|s| s.to_lowercase()).collect();
    let tags: Vec<String> = tags
        .into_iter()
        .filter(|t| {
            let key = t.to_lowercase();
            !actor_keys.contains(&key) && !studio_keys.contains(&key)
        })
        .collect();

    let tag_overrides = overrides.for_tags();
    let title = first_text(record, &["title", "Title"]);
    let title = if title.is_empty() {
        UNTITLED.to_string()
    } else {
        custom_title_case(&title, &overrides.general, false)
    };

    FinalMetadata {
        title,
        url: first_text(record, &["URL", "url"]),
        date: first_text(record, &["date", "Date"]),
        code: first_text(record, &["code", "Code"]),
        actors: actors
            .iter()
            .map(|a| custom_title_case(a, &overrides.general, true))
            .collect(),
        studios: studios
            .iter()
            .map(|s| custom_title_case(s, &overrides.general, true))
            .collect(),
        tags: tags
            .iter()
            .map(|t| custom_title_case(t, &tag_overrides, false))
            .collect(),
        description: first_text(record, &["description", "Description"]),
        image: first_text(record, &["image", "Image", "thumbnail"]),
    }
}

impl From<&FinalMetadata> for ExtractedRecord {
    fn from(meta: &FinalMetadata) -> Self {
        let mut record = ExtractedRecord::new();
        record.insert("title", meta.title.clone());
        record.insert("URL", meta.url.clone());
        record.insert("date", meta.date.clone());
        record.insert("code", meta.code.clone());
        record.insert("actors", meta.actors.clone());
        record.insert("studios", meta.studios.clone());
        record.insert("tags", meta.tags.clone());
        record.insert("description", meta.description.clone());
        record.insert("image", meta.image.clone());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(actors: &[&str], studios: &[&str], tags: &[&str]) -> ExtractedRecord {
        let list = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut record = ExtractedRecord::new();
        record.insert("title", "  a night in the city ");
        record.insert("actors", list(actors));
        record.insert("studios", list(studios));
        record.insert("tags", list(tags));
        record
    }

    #[test]
    fn test_precedence_actor_over_tag() {
        let meta = finalize(
            &record(&["Jane Doe"], &["Jane Doe Productions"], &["jane doe"]),
            &CaseOverrides::default(),
        );
        assert_eq!(meta.actors, vec!["Jane Doe"]);
        assert_eq!(meta.studios, vec!["Jane Doe Productions"]);
        assert!(meta.tags.is_empty());
        assert_eq!(meta.title, "A Night In The City");
    }

    #[test]
    fn test_studio_over_tag_and_hash_stripping() {
        let meta = finalize(
            &record(&["#Alex"], &["#acme", "ACME"], &["#Acme", "#outdoor", "Outdoor", "#"]),
            &CaseOverrides::default(),
        );
        assert_eq!(meta.actors, vec!["Alex"]);
        assert_eq!(meta.studios, vec!["acme"]);
        assert_eq!(meta.tags, vec!["Outdoor"]);
    }

    #[test]
    fn test_overrides_applied() {
        let overrides = CaseOverrides {
            general: vec!["BrutalX".to_string()],
            tags: vec!["POV".to_string()],
        };
        let meta = finalize(&record(&[], &["brutalx"], &["pov scene", "brutalx"]), &overrides);
        assert_eq!(meta.studios, vec!["BrutalX"]);
        assert_eq!(meta.tags, vec!["POV Scene"]);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let overrides = CaseOverrides::default();
        let first = finalize(
            &record(
                &["Jane Doe", "jane doe", "Max Power"],
                &["max power", "Big Studio", "big studio"],
                &["big studio", "Jane Doe", "drama", "Drama", "#comedy"],
            ),
            &overrides,
        );
        let second = finalize(&ExtractedRecord::from(&first), &overrides);
        assert_eq!(first.actors, second.actors);
        assert_eq!(first.studios, second.studios);
        assert_eq!(first.tags, second.tags);
        assert_eq!(first.title, second.title);
        assert_eq!(first.studios, vec!["Big Studio"]);
        assert_eq!(first.tags, vec!["Drama", "Comedy"]);
    }

    #[test]
    fn test_missing_title_is_untitled() {
        let meta = finalize(&ExtractedRecord::new(), &CaseOverrides::default());
        assert_eq!(meta.title, UNTITLED);
        assert!(meta.actors.is_empty());
    }
}
