use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ValidationError;

/// Scheme prepended to locations entered without one.
pub const DEFAULT_SCHEME: &str = "https://";

/// A bookmark row as stored remotely.
///
/// Field names on the wire follow the backing table (`user_id`, `url`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    #[serde(rename = "user_id")]
    pub owner: String,
    pub title: String,
    #[serde(rename = "url")]
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new bookmark. `id` and `created_at` are server-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBookmark {
    #[serde(rename = "user_id")]
    pub owner: String,
    pub title: String,
    #[serde(rename = "url")]
    pub location: String,
}

impl NewBookmark {
    /// Validates and normalizes user input into an insert payload.
    ///
    /// Title and location must be non-empty after trimming. The title is
    /// stored trimmed; the location is trimmed and given a default scheme.
    pub fn from_input(owner: &str, title: &str, location: &str) -> Result<Self, ValidationError> {
        let title = title.trim();
        let location = location.trim();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if location.is_empty() {
            return Err(ValidationError::EmptyLocation);
        }
        Ok(Self {
            owner: owner.to_string(),
            title: title.to_string(),
            location: normalize_location(location),
        })
    }
}

/// Returns true if `value` starts with a URI scheme (`alpha *( alpha / digit / "+" / "-" / "." ) "://"`).
pub fn has_scheme(value: &str) -> bool {
    let Some(idx) = value.find("://") else {
        return false;
    };
    let scheme = &value[..idx];
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Prepends [`DEFAULT_SCHEME`] to a location that has no scheme.
pub fn normalize_location(value: &str) -> String {
    if has_scheme(value) {
        value.to_string()
    } else {
        format!("{}{}", DEFAULT_SCHEME, value)
    }
}
