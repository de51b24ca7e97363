//! Document loading: plain text and Markdown files only.

use std::path::Path;

use tracing::debug;

use studykit_shared::{Result, StudyKitError};

/// File extensions accepted by [`extract_text`] (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown"];

/// Read the text of a document.
///
/// Unsupported extensions, non-UTF-8 content and documents with no text all
/// fail with [`StudyKitError::UnsupportedInput`].
pub fn extract_text(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    if !ext.as_deref().is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e)) {
        return Err(StudyKitError::unsupported_input(format!(
            "unsupported format: {} (expected one of: {})",
            path.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    let bytes = std::fs::read(path).map_err(|e| StudyKitError::io(path, e))?;
    let content = String::from_utf8(bytes).map_err(|_| {
        StudyKitError::unsupported_input(format!("{} is not valid UTF-8 text", path.display()))
    })?;

    let text = content.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return Err(StudyKitError::unsupported_input(format!(
            "{} contains no extractable text",
            path.display()
        )));
    }

    debug!(path = %path.display(), chars = text.chars().count(), "document loaded");
    Ok(text.to_string())
}
