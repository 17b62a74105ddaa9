//! Declarative post-processing steps applied to extracted field values.
//!
//! Steps run strictly in declared order. None of them fail the caller:
//! problems degrade the value and leave a [`Diagnostic`] behind.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::{Regex, RegexBuilder};
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::value::{Diagnostic, FieldValue};

/// Canonical output format of [`PostProcessStep::ParseDate`].
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";

/// How attribute values are compared by [`PostProcessStep::MaxByAttribute`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Int,
    Float,
    #[default]
    #[serde(alias = "string")]
    Str,
}

/// One regex substitution.
#[derive(Debug, Clone)]
pub struct ReplaceRule {
    pub pattern: String,
    pub with: String,
    compiled: Result<Regex, String>,
    replacement: String,
}

impl ReplaceRule {
    /// Compile a rule. A malformed pattern is kept (not rejected) so that the
    /// owning field degrades to empty at extraction time.
    pub fn new(pattern: &str, with: &str) -> Self {
        let compiled = RegexBuilder::new(pattern)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| e.to_string());
        Self {
            pattern: pattern.to_string(),
            with: with.to_string(),
            compiled,
            replacement: translate_replacement(with),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.compiled.as_ref().err().map(|s| s.as_str())
    }

    fn apply(&self, input: &str) -> Result<String, String> {
        let regex = self.compiled.as_ref().map_err(|e| e.clone())?;
        if input.is_empty() {
            return Ok(String::new());
        }
        Ok(regex
            .replace_all(input, self.replacement.as_str())
            .into_owned())
    }
}

/// Convert `\1` / `\g<name>` back-references into the `${1}` / `${name}`
/// syntax understood by the regex crate, escaping literal `$`.
fn translate_replacement(with: &str) -> String {
    let mut out = String::with_capacity(with.len() + 4);
    let mut chars = with.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(&d) = chars.peek() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", group));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|&ch| ch != '>').collect();
                        out.push_str(&format!("${{{}}}", name));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

/// A single post-processing step.
#[derive(Debug, Clone)]
pub enum PostProcessStep {
    /// Regex substitutions, applied pair by pair.
    Replace(Vec<ReplaceRule>),
    /// Reparse a date from `format` into `YYYY-MM-DD`.
    ParseDate { format: String },
    /// Keep the list item whose source element carries the greatest attribute.
    MaxByAttribute {
        attribute: String,
        kind: AttributeType,
    },
    /// Collapse a list to its first element.
    First,
}

impl PostProcessStep {
    pub fn name(&self) -> &'static str {
        match self {
            PostProcessStep::Replace(_) => "replace",
            PostProcessStep::ParseDate { .. } => "parseDate",
            PostProcessStep::MaxByAttribute { .. } => "maxByAttribute",
            PostProcessStep::First => "first",
        }
    }
}

/// Run `steps` over `value` in order.
///
/// `sources` holds the element each list item was read from (same index),
/// used by [`PostProcessStep::MaxByAttribute`].
pub fn apply(
    field: &str,
    mut value: FieldValue,
    steps: &[PostProcessStep],
    sources: &[ElementRef<'_>],
    diagnostics: &mut Vec<Diagnostic>,
) -> FieldValue {
    for step in steps {
        value = match step {
            PostProcessStep::Replace(rules) => apply_replace(field, value, rules, diagnostics),
            PostProcessStep::ParseDate { format } => {
                apply_parse_date(field, value, format, diagnostics)
            }
            PostProcessStep::MaxByAttribute { attribute, kind } => {
                apply_max_by_attribute(field, value, attribute, *kind, sources, diagnostics)
            }
            PostProcessStep::First => value.into_first(),
        };
    }
    value
}

fn apply_replace(
    field: &str,
    mut value: FieldValue,
    rules: &[ReplaceRule],
    diagnostics: &mut Vec<Diagnostic>,
) -> FieldValue {
    for rule in rules {
        let result = match &value {
            FieldValue::Single(s) => rule.apply(s).map(FieldValue::Single),
            FieldValue::List(items) => items
                .iter()
                .map(|s| rule.apply(s))
                .collect::<Result<Vec<_>, _>>()
                .map(FieldValue::List),
        };
        value = match result {
            Ok(v) => {
                debug!("Applied regex '{}' -> '{}' for '{}'", rule.pattern, rule.with, field);
                v
            }
            Err(e) => {
                warn!("Regex error for '{}': regex={}, error={}", field, rule.pattern, e);
                diagnostics.push(Diagnostic::new(
                    field,
                    format!("malformed regex '{}': {}", rule.pattern, e),
                ));
                match value {
                    FieldValue::Single(_) => FieldValue::default(),
                    FieldValue::List(_) => FieldValue::empty_list(),
                }
            }
        };
    }
    value
}

fn apply_parse_date(
    field: &str,
    value: FieldValue,
    format: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> FieldValue {
    let mut reparse = |raw: &str| -> String {
        match parse_date(raw, format) {
            Some(date) => date,
            None => {
                if !raw.trim().is_empty() {
                    debug!("Could not parse date '{}' for '{}' with '{}'", raw, field, format);
                    diagnostics.push(Diagnostic::new(
                        field,
                        format!("unparsable date '{}' for format '{}'", raw, format),
                    ));
                }
                String::new()
            }
        }
    };
    match value {
        FieldValue::Single(s) => FieldValue::Single(reparse(&s)),
        FieldValue::List(items) => FieldValue::List(items.iter().map(|s| reparse(s)).collect()),
    }
}

/// Parse `input` with a strftime-style `format` and render it as `YYYY-MM-DD`.
///
/// `iso8601` / `rfc3339` select RFC 3339 parsing. Returns `None` rather than
/// a partial date when the input does not match.
pub fn parse_date(input: &str, format: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let date = match format.to_ascii_lowercase().as_str() {
        "iso8601" | "iso-8601" | "rfc3339" => DateTime::parse_from_rfc3339(input)
            .ok()
            .map(|dt| dt.date_naive()),
        _ => DateTime::parse_from_str(input, format)
            .map(|dt| dt.date_naive())
            .or_else(|_| NaiveDateTime::parse_from_str(input, format).map(|dt| dt.date()))
            .or_else(|_| NaiveDate::parse_from_str(input, format))
            .ok(),
    }?;

    Some(date.format(CANONICAL_DATE_FORMAT).to_string())
}

#[derive(Debug, Clone, PartialEq, PartialOrd)]
enum AttrKey {
    Int(i64),
    Float(f64),
    Str(String),
}

fn convert_attribute(raw: &str, kind: AttributeType) -> Result<AttrKey, String> {
    let trimmed = raw.trim();
    match kind {
        AttributeType::Int => trimmed
            .parse::<i64>()
            .map(AttrKey::Int)
            .map_err(|e| format!("'{}' is not an int: {}", raw, e)),
        AttributeType::Float => trimmed
            .parse::<f64>()
            .map(AttrKey::Float)
            .map_err(|e| format!("'{}' is not a float: {}", raw, e)),
        AttributeType::Str => Ok(AttrKey::Str(raw.to_string())),
    }
}

fn apply_max_by_attribute(
    field: &str,
    value: FieldValue,
    attribute: &str,
    kind: AttributeType,
    sources: &[ElementRef<'_>],
    diagnostics: &mut Vec<Diagnostic>,
) -> FieldValue {
    let items = match value {
        FieldValue::List(items) => items,
        single => {
            debug!("Skipping maxByAttribute for '{}': value is not a list", field);
            return single;
        }
    };

    let candidates: Vec<(usize, &str)> = items
        .iter()
        .enumerate()
        .filter_map(|(i, _)| {
            sources
                .get(i)
                .and_then(|el| el.value().attr(attribute))
                .map(|attr| (i, attr))
        })
        .collect();

    if candidates.is_empty() {
        debug!("No '{}' attributes found for '{}'; using first value", attribute, field);
        return FieldValue::List(items).into_first();
    }

    let keyed: Result<Vec<(usize, AttrKey)>, String> = candidates
        .into_iter()
        .map(|(i, attr)| convert_attribute(attr, kind).map(|key| (i, key)))
        .collect();

    let keyed = match keyed {
        Ok(keyed) => keyed,
        Err(e) => {
            warn!("Failed to convert '{}' for '{}': {}", attribute, field, e);
            diagnostics.push(Diagnostic::new(field, e));
            return FieldValue::List(items).into_first();
        }
    };

    let mut best: Option<&(usize, AttrKey)> = None;
    for entry in &keyed {
        best = match best {
            None => Some(entry),
            Some(current) => match entry.1.partial_cmp(&current.1) {
                Some(Ordering::Greater) => Some(entry),
                Some(_) => Some(current),
                None => {
                    diagnostics.push(Diagnostic::new(
                        field,
                        format!("'{}' values are not comparable", attribute),
                    ));
                    return FieldValue::List(items).into_first();
                }
            },
        };
    }

    match best {
        Some((index, _)) => {
            let selected = items.get(*index).cloned().unwrap_or_default();
            debug!("maxByAttribute '{}' for '{}' selected {}", attribute, field, selected);
            FieldValue::Single(selected)
        }
        None => FieldValue::List(items).into_first(),
    }
}
