//! Declarative field extraction over parsed HTML.
//!
//! A site adapter describes each field as a [`FieldSpec`]: where to look
//! (selectors, an embedded frame, the node itself), what to read (text or an
//! attribute) and how to post-process the result. [`extract`] resolves those
//! specs against a node and never fails; problems are reported as
//! [`Diagnostic`]s on the returned [`ExtractedRecord`].

pub mod field;
pub mod postprocess;
pub mod value;

pub use field::{
    dedup_case_insensitive, extract, required_frames, Cardinality, CompiledSelector, FieldSource,
    FieldSpec, FrameDocuments, MULTI_VALUED_FIELDS,
};
pub use postprocess::{parse_date, AttributeType, PostProcessStep, ReplaceRule};
pub use value::{Diagnostic, ExtractedRecord, FieldValue};

use scraper::Html;

/// Parse `html` and extract `fields` from the whole document.
pub fn extract_document<'a>(
    html: &str,
    fields: impl IntoIterator<Item = &'a FieldSpec>,
    frames: &FrameDocuments,
) -> ExtractedRecord {
    let document = Html::parse_document(html);
    extract(document.root_element(), fields, frames)
}
