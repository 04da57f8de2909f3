//! Blob-store key conventions.
//!
//! Pure string functions. These define the canonical layout of engine-owned
//! objects (state and locks) in the shared blob store.

use crate::error::CoreError;

pub const STATE_PREFIX: &str = "state/";

pub const LOCKS_PREFIX: &str = "locks/";

/// Lock name protecting the state document of one environment.
pub const STATE_LOCK: &str = "state";

pub fn state(project: &str, environment: &str) -> String {
    format!("{STATE_PREFIX}{project}/{environment}/state.json")
}

pub fn locks_prefix(project: &str, environment: &str) -> String {
    format!("{LOCKS_PREFIX}{project}/{environment}/")
}

pub fn lock(project: &str, environment: &str, name: &str) -> String {
    format!("{}{name}.lock", locks_prefix(project, environment))
}

/// Check that a project, environment or lock name can be used as one path
/// segment of a key.
pub fn validate_segment(segment: &str) -> Result<(), CoreError> {
    let reason = if segment.is_empty() {
        "must not be empty"
    } else if segment.contains('/') {
        "must not contain '/'"
    } else if segment == "." || segment == ".." {
        "must not be a relative path component"
    } else if segment.chars().any(char::is_control) {
        "must not contain control characters"
    } else {
        return Ok(());
    };

    Err(CoreError::InvalidSegment {
        segment: segment.to_string(),
        reason,
    })
}
