//! Display names of enrolled fingers

use crate::error::{Error, Result};

/// Longest name kept, in bytes
///
/// Names live in fixed 32-byte records with a terminating zero.
pub const MAX_NAME_LEN: usize = 31;

/// Trim `name` and cut it to [`MAX_NAME_LEN`] bytes on a character boundary
///
/// # Errors
///
/// Returns [`Error::Validation`] for a blank name.
pub fn normalize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(Error::Validation("name must not be empty".into()));
    }

    let mut end = trimmed.len().min(MAX_NAME_LEN);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }

    Ok(trimmed[..end].to_owned())
}
