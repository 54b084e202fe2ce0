//! Worker/service name sanitizing

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// Names the deployment tool accepts as-is
static VALID_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

/// Single character outside the accepted set
static INVALID_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]").unwrap());

/// Replace every character outside `[a-z0-9-]` with `-`, one for one.
///
/// Uppercase letters are replaced, not lowered. Valid names are borrowed back
/// unchanged.
pub fn sanitize(name: &str) -> Cow<'_, str> {
    if VALID_NAME.is_match(name) {
        return Cow::Borrowed(name);
    }
    INVALID_CHAR.replace_all(name, "-")
}
