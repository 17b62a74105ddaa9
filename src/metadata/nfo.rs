//! `.nfo` sidecar documents.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::{debug, info};

use super::FinalMetadata;

/// Sidecar path for a media file: same stem, `.nfo` extension.
pub fn nfo_path(media_path: &Path) -> PathBuf {
    media_path.with_extension("nfo")
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Render the sidecar XML. Empty fields are omitted.
pub fn render_nfo(meta: &FinalMetadata) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    writer.write_event(Event::Start(BytesStart::new("movie")))?;

    if !meta.title.is_empty() {
        text_element(&mut writer, "title", &meta.title)?;
    }
    if !meta.url.is_empty() {
        text_element(&mut writer, "url", &meta.url)?;
    }
    if !meta.date.is_empty() {
        text_element(&mut writer, "premiered", &meta.date)?;
    }
    if !meta.code.is_empty() {
        text_element(&mut writer, "uniqueid", &meta.code)?;
    }
    for tag in &meta.tags {
        text_element(&mut writer, "tag", tag)?;
    }
    for (order, actor) in meta.actors.iter().enumerate() {
        writer.write_event(Event::Start(BytesStart::new("actor")))?;
        text_element(&mut writer, "name", actor)?;
        text_element(&mut writer, "order", &(order + 1).to_string())?;
        writer.write_event(Event::End(BytesEnd::new("actor")))?;
    }
    if !meta.image.is_empty() {
        let thumb = BytesStart::new("thumb").with_attributes([("aspect", "poster")]);
        writer.write_event(Event::Start(thumb))?;
        writer.write_event(Event::Text(BytesText::new(&meta.image)))?;
        writer.write_event(Event::End(BytesEnd::new("thumb")))?;
    }
    for studio in &meta.studios {
        text_element(&mut writer, "studio", studio)?;
    }
    if !meta.description.is_empty() {
        text_element(&mut writer, "plot", &meta.description)?;
    }

    writer.write_event(Event::End(BytesEnd::new("movie")))?;
    let mut xml = String::from_utf8(writer.into_inner()).context("Sidecar is not UTF-8")?;
    xml.push('\n');
    Ok(xml)
}

/// Write the sidecar next to `media_path`.
///
/// An existing sidecar is kept unless `overwrite` is set. Returns the path
/// and whether it was written.
pub async fn write_nfo(media_path: &Path, meta: &FinalMetadata, overwrite: bool) -> Result<(PathBuf, bool)> {
    let path = nfo_path(media_path);
    if !overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!("NFO exists at {}. Skipping generation.", path.display());
        return Ok((path, false));
    }
    let xml = render_nfo(meta)?;
    tokio::fs::write(&path, xml)
        .await
        .with_context(|| format!("Failed to write NFO at {}", path.display()))?;
    info!("Generated NFO at {}", path.display());
    Ok((path, true))
}
