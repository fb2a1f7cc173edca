//! Parameter validation for submissions and queries.
//!
//! Destinations must be domestic mobile numbers, extensions are one to
//! six digits, and content is bounded in code points rather than bytes.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Maximum message body length, in code points.
pub const MAX_CONTENT_CHARS: usize = 500;

/// Maximum on-wire originator length, in bytes.
pub const MAX_SOURCE_BYTES: usize = 21;

/// Maximum search keyword length, in code points.
const MAX_KEYWORD_CHARS: usize = 100;

/// Highest accepted page number.
const MAX_PAGE: usize = 10_000;

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // domestic mobile: 13x through 19x
    Regex::new(r"^1[3-9]\d{9}$").unwrap()
});

static EXT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,6}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a submission before it is built into a frame.
///
/// `src` is the optional extension code; `dest` and `content` are
/// required.
pub fn validate_submit(src: &str, dest: &str, content: &str) -> Result<(), ValidationError> {
    if dest.is_empty() {
        return Err(ValidationError::new("dest", "destination must not be empty"));
    }
    if !PHONE_RE.is_match(dest) {
        return Err(ValidationError::new(
            "dest",
            format!("invalid mobile number: {dest}"),
        ));
    }

    if !src.is_empty() && !EXT_RE.is_match(src) {
        return Err(ValidationError::new(
            "src",
            format!("invalid extension code: {src} (1-6 digits)"),
        ));
    }

    if content.is_empty() {
        return Err(ValidationError::new("cont", "content must not be empty"));
    }
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(ValidationError::new(
            "cont",
            format!("content too long: {chars} chars, maximum {MAX_CONTENT_CHARS}"),
        ));
    }

    Ok(())
}

/// Derive the on-wire originator: the access code alone, or the access
/// code with the extension appended.
pub fn derive_source(access_no: &str, src: &str) -> Result<String, ValidationError> {
    let composite = if src.is_empty() || src == access_no {
        access_no.to_string()
    } else {
        format!("{access_no}{src}")
    };

    if composite.len() > MAX_SOURCE_BYTES {
        return Err(ValidationError::new(
            "src",
            format!(
                "composite source {composite} exceeds {MAX_SOURCE_BYTES} bytes"
            ),
        ));
    }
    Ok(composite)
}

/// Validate search filter values before scanning the logs.
pub fn validate_search(dest: &str, src: &str, content: &str) -> Result<(), ValidationError> {
    if !dest.is_empty() && !PHONE_RE.is_match(dest) {
        return Err(ValidationError::new(
            "dest",
            format!("invalid mobile number: {dest}"),
        ));
    }

    if !src.is_empty() && !EXT_RE.is_match(src) && !PHONE_RE.is_match(src) {
        return Err(ValidationError::new(
            "src",
            format!("invalid source: {src} (extension or 11-digit mobile)"),
        ));
    }

    if content.chars().count() > MAX_KEYWORD_CHARS {
        return Err(ValidationError::new(
            "content",
            format!("search keyword too long (maximum {MAX_KEYWORD_CHARS} chars)"),
        ));
    }

    Ok(())
}

/// Parse a page parameter. Empty means the first page; zero, negative or
/// absurdly large values are rejected.
pub fn parse_page(raw: &str) -> Result<usize, ValidationError> {
    if raw.is_empty() {
        return Ok(1);
    }

    let page: usize = raw
        .parse()
        .map_err(|_| ValidationError::new("page", format!("invalid page number: {raw}")))?;

    if page < 1 {
        return Err(ValidationError::new(
            "page",
            format!("page must be at least 1, got {page}"),
        ));
    }
    if page > MAX_PAGE {
        return Err(ValidationError::new(
            "page",
            format!("page too large: {page} (maximum {MAX_PAGE})"),
        ));
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_mobile_prefix() {
        for prefix in 3..=9 {
            let dest = format!("1{prefix}000000000");
            assert!(validate_submit("", &dest, "hi").is_ok(), "prefix {prefix}");
        }
    }

    #[test]
    fn rejects_non_mobile_destinations() {
        for dest in ["", "12800138000", "2380013800", "138001380001", "1380013800a"] {
            let err = validate_submit("", dest, "hi").unwrap_err();
            assert_eq!(err.field, "dest", "dest {dest:?}");
        }
    }

    #[test]
    fn extension_bounds() {
        assert!(validate_submit("123456", "13800138000", "x").is_ok());
        assert!(validate_submit("1", "13800138000", "x").is_ok());

        let err = validate_submit("1234567", "13800138000", "x").unwrap_err();
        assert_eq!(err.field, "src");
        let err = validate_submit("12a", "13800138000", "x").unwrap_err();
        assert_eq!(err.field, "src");
    }

    #[test]
    fn content_bounded_in_code_points() {
        let exactly = "知".repeat(MAX_CONTENT_CHARS);
        assert!(validate_submit("", "13800138000", &exactly).is_ok());

        let over = "知".repeat(MAX_CONTENT_CHARS + 1);
        let err = validate_submit("", "13800138000", &over).unwrap_err();
        assert_eq!(err.field, "cont");

        let err = validate_submit("", "13800138000", "").unwrap_err();
        assert_eq!(err.field, "cont");
    }

    #[test]
    fn source_derivation() {
        assert_eq!(derive_source("10657", "").unwrap(), "10657");
        assert_eq!(derive_source("10657", "10657").unwrap(), "10657");
        assert_eq!(derive_source("10657", "999").unwrap(), "10657999");

        // 16-byte access number + 6-digit extension tips past 21 bytes
        let err = derive_source("1065712345678901", "123456").unwrap_err();
        assert_eq!(err.field, "src");
    }

    #[test]
    fn page_parameter_boundaries() {
        assert_eq!(parse_page("").unwrap(), 1);
        assert_eq!(parse_page("1").unwrap(), 1);
        assert_eq!(parse_page("10000").unwrap(), 10_000);

        assert!(parse_page("0").is_err());
        assert!(parse_page("10001").is_err());
        assert!(parse_page("-1").is_err());
        assert!(parse_page("abc").is_err());
    }

    #[test]
    fn search_params() {
        assert!(validate_search("", "", "").is_ok());
        assert!(validate_search("13800138000", "999", "code").is_ok());
        assert!(validate_search("", "13800138000", "").is_ok());

        assert!(validate_search("12800138000", "", "").is_err());
        assert!(validate_search("", "12x", "").is_err());
        assert!(validate_search("", "", &"k".repeat(101)).is_err());
    }
}
