//! Extracted values and the per-page record they are collected into.

use std::collections::BTreeMap;

use serde::Serialize;

/// Value of one extracted field: a single string or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    List(Vec<String>),
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Single(String::new())
    }
}

impl FieldValue {
    pub fn empty_list() -> Self {
        FieldValue::List(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Single(s) => s.is_empty(),
            FieldValue::List(v) => v.is_empty(),
        }
    }

    /// Scalar view. Lists yield their first element.
    pub fn as_str(&self) -> &str {
        match self {
            FieldValue::Single(s) => s,
            FieldValue::List(v) => v.first().map(|s| s.as_str()).unwrap_or(""),
        }
    }

    /// List view. A non-empty scalar becomes a one-element list.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            FieldValue::Single(s) if s.is_empty() => Vec::new(),
            FieldValue::Single(s) => vec![s.clone()],
            FieldValue::List(v) => v.clone(),
        }
    }

    /// Collapse to the first element (empty string when there is none).
    pub fn into_first(self) -> Self {
        match self {
            FieldValue::List(v) => FieldValue::Single(v.into_iter().next().unwrap_or_default()),
            single => single,
        }
    }

    /// Every string carried by the value.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            FieldValue::Single(s) => Box::new(std::iter::once(s.as_str())),
            FieldValue::List(v) => Box::new(v.iter().map(|s| s.as_str())),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Single(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Single(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::List(v)
    }
}

/// Something that went wrong for a single field without failing the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub field: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Field name to value mapping produced by one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedRecord {
    fields: BTreeMap<String, FieldValue>,
    #[serde(skip)]
    diagnostics: Vec<Diagnostic>,
}

impl ExtractedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Scalar value of a field, empty when absent.
    pub fn text(&self, field: &str) -> &str {
        self.fields.get(field).map(|v| v.as_str()).unwrap_or("")
    }

    /// List value of a field, empty when absent.
    pub fn list(&self, field: &str) -> Vec<String> {
        self.fields.get(field).map(|v| v.to_list()).unwrap_or_default()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub(crate) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_views() {
        let list = FieldValue::List(vec!["a".into(), "b".into()]);
        assert_eq!(list.as_str(), "a");
        assert_eq!(list.clone().into_first(), FieldValue::Single("a".into()));
        assert_eq!(FieldValue::empty_list().into_first(), FieldValue::default());
        assert!(FieldValue::Single(String::new()).to_list().is_empty());
        assert_eq!(FieldValue::from("x").to_list(), vec!["x".to_string()]);
    }

    #[test]
    fn test_record_missing_fields_are_empty() {
        let record = ExtractedRecord::new();
        assert_eq!(record.text("title"), "");
        assert!(record.list("tags").is_empty());
    }
}
