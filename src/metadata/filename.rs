//! Filesystem-safe filenames.

use tracing::{debug, warn};

use crate::config::{FileNaming, MAX_FILENAME_BYTES};

/// Remove every character of `invalid_chars` (plus NUL and `/`, which no
/// filesystem accepts) from `title`.
pub fn strip_invalid(title: &str, invalid_chars: &str) -> String {
    title
        .chars()
        .filter(|c| !invalid_chars.contains(*c) && *c != '/' && *c != '\0')
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Build `{prefix}{title}{suffix}{extension}`.
///
/// The title is cleaned and cut to fit `max_chars` characters overall, then
/// shortened further until the name fits in 255 UTF-8 bytes. The extension
/// is always kept.
pub fn construct_filename(title: &str, prefix: &str, suffix: &str, naming: &FileNaming) -> String {
    let extension = naming.extension.as_str();
    let mut processed = strip_invalid(title, &naming.invalid_chars);

    let fixed = prefix.chars().count() + suffix.chars().count() + extension.chars().count();
    let cap = naming.max_chars.min(MAX_FILENAME_BYTES);
    let max_title = if cap > fixed {
        cap - fixed
    } else {
        warn!(
            "Fixed filename parts ({} chars) exceed max_chars ({}); truncating to fit",
            fixed, naming.max_chars
        );
        MAX_FILENAME_BYTES.saturating_sub(fixed).max(1)
    };

    if processed.chars().count() > max_title {
        processed = truncate_chars(&processed, max_title).trim_end().to_string();
        debug!("Truncated title to {} chars: {}", max_title, processed);
    }

    let mut filename = format!("{}{}{}{}", prefix, processed, suffix, extension);
    let oversized = filename.len() > MAX_FILENAME_BYTES;
    while filename.len() > MAX_FILENAME_BYTES && !processed.is_empty() {
        processed.pop();
        let trimmed = processed.trim_end().len();
        processed.truncate(trimmed);
        filename = format!("{}{}{}{}", prefix, processed, suffix, extension);
    }

    if filename.len() > MAX_FILENAME_BYTES {
        // Prefix and suffix alone are too long.
        let budget = MAX_FILENAME_BYTES.saturating_sub(extension.len());
        let body = format!("{}{}", prefix, suffix);
        filename = format!("{}{}", truncate_bytes(&body, budget), extension);
    }
    if oversized {
        debug!("Filename exceeded {} bytes; trimmed to: {}", MAX_FILENAME_BYTES, filename);
    }
    filename
}
