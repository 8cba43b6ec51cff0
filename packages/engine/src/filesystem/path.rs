use unicode_normalization::UnicodeNormalization;

use crate::LixError;

/// Normalizes a file path to NFC and validates the canonical shape: rooted,
/// no trailing slash, no empty or dot segments.
pub(crate) fn normalize_file_path(path: &str) -> Result<String, LixError> {
    let normalized: String = path.nfc().collect();
    if !normalized.starts_with('/') {
        return Err(LixError::planner(format!(
            "file path must start with '/': '{path}'"
        )));
    }
    if normalized.len() > 1 && normalized.ends_with('/') {
        return Err(LixError::planner(format!(
            "file path must not end with '/': '{path}'"
        )));
    }
    for segment in normalized[1..].split('/') {
        if segment.is_empty() {
            return Err(LixError::planner(format!(
                "file path must not contain empty segments: '{path}'"
            )));
        }
        if segment == "." || segment == ".." {
            return Err(LixError::planner(format!(
                "file path must not contain dot segments: '{path}'"
            )));
        }
    }
    Ok(normalized)
}

/// Splits a normalized path into file name and extension. The extension is
/// the text after the last dot, unless the name starts with that dot.
pub(crate) fn file_name_and_extension(path: &str) -> (String, Option<String>) {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(index) if index > 0 && index + 1 < file_name.len() => (
            file_name[..index].to_string(),
            Some(file_name[index + 1..].to_string()),
        ),
        _ => (file_name.to_string(), None),
    }
}
