//! Field specs and the extractor that resolves them against a parsed node.

use std::collections::{HashMap, HashSet};

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::postprocess::{self, PostProcessStep};
use super::value::{Diagnostic, ExtractedRecord, FieldValue};
use crate::error::ScrapeError;

/// Field names that are always extracted as lists.
pub const MULTI_VALUED_FIELDS: &[&str] = &["tags", "actors", "studios", "producers", "genres"];

/// Whether a field resolves to a scalar or a list. Fixed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Multiple,
}

impl Cardinality {
    pub fn for_field(name: &str, explicit_multiple: Option<bool>) -> Self {
        match explicit_multiple {
            Some(true) => Cardinality::Multiple,
            Some(false) => Cardinality::Single,
            None if MULTI_VALUED_FIELDS.contains(&name) => Cardinality::Multiple,
            None => Cardinality::Single,
        }
    }

    pub fn empty(&self) -> FieldValue {
        match self {
            Cardinality::Single => FieldValue::default(),
            Cardinality::Multiple => FieldValue::empty_list(),
        }
    }
}

/// A CSS selector paired with its source text.
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    pub css: String,
    selector: Selector,
}

impl CompiledSelector {
    pub fn parse(css: &str) -> Result<Self, ScrapeError> {
        let selector = Selector::parse(css)
            .map_err(|e| ScrapeError::ConfigMismatch(format!("invalid selector '{}': {}", css, e)))?;
        Ok(Self {
            css: css.to_string(),
            selector,
        })
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// First match below `node`.
    pub fn select_one<'a>(&self, node: ElementRef<'a>) -> Option<ElementRef<'a>> {
        node.select(&self.selector).next()
    }
}

/// Where a field's elements come from.
#[derive(Debug, Clone)]
pub enum FieldSource {
    /// Prioritized selectors; the first one matching anything wins.
    Selectors(Vec<CompiledSelector>),
    /// The extraction node itself (attribute-only specs).
    SelfNode,
}

/// A validated, immutable field spec.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub source: FieldSource,
    pub attribute: Option<String>,
    /// Selector of the embedded frame to query inside.
    pub frame: Option<String>,
    pub json_key: Option<String>,
    pub steps: Vec<PostProcessStep>,
    pub cardinality: Cardinality,
}

impl FieldSpec {
    /// A plain selector field, with cardinality decided by name.
    pub fn selector(name: &str, css: &str) -> Result<Self, ScrapeError> {
        Ok(Self {
            name: name.to_string(),
            source: FieldSource::Selectors(vec![CompiledSelector::parse(css)?]),
            attribute: None,
            frame: None,
            json_key: None,
            steps: Vec::new(),
            cardinality: Cardinality::for_field(name, None),
        })
    }

    pub fn with_attribute(mut self, attribute: &str) -> Self {
        self.attribute = Some(attribute.to_string());
        self
    }

    pub fn with_steps(mut self, steps: Vec<PostProcessStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn is_multiple(&self) -> bool {
        self.cardinality == Cardinality::Multiple
    }
}

/// HTML of embedded frames, keyed by the selector that located them.
///
/// Frames are fetched by the caller (usually through a browser session)
/// before extraction so the extractor itself stays synchronous.
#[derive(Debug, Clone, Default)]
pub struct FrameDocuments {
    documents: HashMap<String, String>,
}

impl FrameDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, frame_selector: impl Into<String>, html: impl Into<String>) {
        self.documents.insert(frame_selector.into(), html.into());
    }

    pub fn get(&self, frame_selector: &str) -> Option<&str> {
        self.documents.get(frame_selector).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Frame selectors referenced by `fields`, in first-use order.
pub fn required_frames<'a>(fields: impl IntoIterator<Item = &'a FieldSpec>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    fields
        .into_iter()
        .filter_map(|f| f.frame.as_deref())
        .filter(|frame| seen.insert(*frame))
        .collect()
}

/// Resolve every field spec against `node`.
///
/// Never fails: a field that cannot be resolved is empty (per its
/// cardinality) and the reason is kept as a diagnostic on the record.
pub fn extract<'a>(
    node: ElementRef<'_>,
    fields: impl IntoIterator<Item = &'a FieldSpec>,
    frames: &FrameDocuments,
) -> ExtractedRecord {
    let fields: Vec<&FieldSpec> = fields.into_iter().collect();

    let parsed_frames: HashMap<&str, Html> = required_frames(fields.iter().copied())
        .into_iter()
        .filter_map(|sel| frames.get(sel).map(|html| (sel, Html::parse_document(html))))
        .collect();

    let mut record = ExtractedRecord::new();
    for spec in fields {
        let mut diagnostics = Vec::new();
        let root = match spec.frame.as_deref() {
            None => Some(node),
            Some(frame) => match parsed_frames.get(frame) {
                Some(doc) => Some(doc.root_element()),
                None => {
                    debug!("Frame '{}' unavailable for '{}'", frame, spec.name);
                    diagnostics.push(Diagnostic::new(
                        &spec.name,
                        format!("frame '{}' could not be pierced", frame),
                    ));
                    None
                }
            },
        };

        let value = match root {
            Some(root) => extract_field(root, spec, &mut diagnostics),
            None => spec.cardinality.empty(),
        };
        debug!("Final value for '{}': {:?}", spec.name, value);
        record.insert(spec.name.clone(), value);
        for diagnostic in diagnostics {
            record.push_diagnostic(diagnostic);
        }
    }
    record
}

fn select_elements<'a>(root: ElementRef<'a>, source: &FieldSource) -> Vec<ElementRef<'a>> {
    match source {
        FieldSource::SelfNode => vec![root],
        FieldSource::Selectors(selectors) => {
            for sel in selectors {
                let found: Vec<ElementRef<'a>> = root.select(sel.selector()).collect();
                if !found.is_empty() {
                    return found;
                }
            }
            Vec::new()
        }
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn extract_field(
    root: ElementRef<'_>,
    spec: &FieldSpec,
    diagnostics: &mut Vec<Diagnostic>,
) -> FieldValue {
    let elements = select_elements(root, &spec.source);
    if elements.is_empty() {
        debug!("No elements found for '{}'", spec.name);
        diagnostics.push(Diagnostic::new(&spec.name, "no matching elements"));
        return spec.cardinality.empty();
    }

    // Each value stays paired with the element it came from.
    let mut pairs: Vec<(String, ElementRef<'_>)> = match (&spec.attribute, spec.cardinality) {
        (Some(attr), _) => elements
            .iter()
            .filter_map(|el| {
                el.value()
                    .attr(attr)
                    .filter(|v| !v.is_empty())
                    .map(|v| (v.to_string(), *el))
            })
            .collect(),
        (None, Cardinality::Single) => vec![(element_text(&elements[0]), elements[0])],
        (None, Cardinality::Multiple) => elements
            .iter()
            .map(|el| (element_text(el), *el))
            .filter(|(text, _)| !text.is_empty())
            .collect(),
    };

    if let Some(key) = &spec.json_key {
        pairs = pairs
            .into_iter()
            .flat_map(|(raw, el)| match json_lookup(&raw, key) {
                Ok(values) => values.into_iter().map(|v| (v, el)).collect::<Vec<_>>(),
                Err(e) => {
                    debug!("Failed to parse JSON for field {}: {}", spec.name, e);
                    diagnostics.push(Diagnostic::new(&spec.name, e));
                    vec![(raw, el)]
                }
            })
            .collect();
    }

    if spec.is_multiple() {
        pairs = dedup_pairs(pairs);
    }

    let (values, sources): (Vec<String>, Vec<ElementRef<'_>>) = pairs.into_iter().unzip();
    let raw = match (spec.cardinality, values.len()) {
        (Cardinality::Multiple, _) => FieldValue::List(values),
        (Cardinality::Single, 0) => FieldValue::default(),
        (Cardinality::Single, 1) => FieldValue::Single(values.into_iter().next().unwrap_or_default()),
        (Cardinality::Single, _) => FieldValue::List(values),
    };

    let processed = postprocess::apply(&spec.name, raw, &spec.steps, &sources, diagnostics);

    match spec.cardinality {
        Cardinality::Single => processed.into_first(),
        Cardinality::Multiple => FieldValue::List(dedup_case_insensitive(processed.to_list())),
    }
}

fn dedup_pairs<T>(pairs: Vec<(String, T)>) -> Vec<(String, T)> {
    let mut seen = HashSet::new();
    pairs
        .into_iter()
        .filter(|(value, _)| seen.insert(value.to_lowercase()))
        .collect()
}

/// Drop later case-insensitive duplicates, keeping first-seen order.
pub fn dedup_case_insensitive(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .collect()
}

fn json_lookup(raw: &str, key: &str) -> Result<Vec<String>, String> {
    let doc: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))?;
    let value = doc
        .get(key)
        .ok_or_else(|| format!("JSON key '{}' not present", key))?;
    Ok(match value {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items.iter().map(json_scalar).collect(),
        serde_json::Value::Null => vec![String::new()],
        other => vec![json_scalar(other)],
    })
}

fn json_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
