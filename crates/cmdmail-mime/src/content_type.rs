//! MIME content type and disposition handling.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart"), lowercased.
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "signed"), lowercased.
    pub sub_type: String,
    /// Parameters keyed by lowercased name (e.g., charset, boundary).
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into().to_ascii_lowercase(),
            sub_type: sub_type.into().to_ascii_lowercase(),
            parameters: HashMap::new(),
        }
    }

    /// The RFC 2045 default: `text/plain; charset=us-ascii`.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "us-ascii")
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Returns `type/subtype` without parameters.
    #[must_use]
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Whether the essence equals `mime_type`, ignoring case.
    #[must_use]
    pub fn is(&self, mime_type: &str) -> bool {
        mime_type
            .split_once('/')
            .is_some_and(|(main, sub)| {
                self.main_type.eq_ignore_ascii_case(main.trim())
                    && self.sub_type.eq_ignore_ascii_case(sub.trim())
            })
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Returns the name parameter, used by some senders instead of a
    /// disposition filename.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters.get("name").map(String::as_str)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="quoted; value"`
    ///
    /// # Errors
    ///
    /// Returns an error if the type or subtype is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let mut pieces = split_parameters(s).into_iter();

        let type_str = pieces.next().unwrap_or_default();
        let (main_type, sub_type) = type_str
            .split_once('/')
            .map(|(m, s)| (m.trim(), s.trim()))
            .filter(|(m, s)| !m.is_empty() && !s.is_empty())
            .ok_or_else(|| Error::InvalidContentType(s.to_string()))?;

        let mut content_type = Self::new(main_type, sub_type);
        content_type.parameters = parse_parameters(pieces);
        Ok(content_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;

        let mut params: Vec<_> = self.parameters.iter().collect();
        params.sort();
        for (key, value) in params {
            if value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)) {
                write!(f, "; {key}=\"{value}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
    }
}

/// A parsed `Content-Disposition` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Disposition type, lowercased (`inline`, `attachment`, ...).
    pub kind: String,
    /// Parameters keyed by lowercased name.
    pub parameters: HashMap<String, String>,
}

impl ContentDisposition {
    /// Parses a disposition value. Never fails; an empty value yields an
    /// empty kind.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut pieces = split_parameters(s).into_iter();
        let kind = pieces.next().unwrap_or_default().trim().to_ascii_lowercase();
        Self {
            kind,
            parameters: parse_parameters(pieces),
        }
    }

    /// Whether this disposition is exactly `inline`.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.kind == "inline"
    }

    /// Returns the filename parameter if present.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters.get("filename").map(String::as_str)
    }
}

/// Splits on semicolons that are not inside double quotes.
fn split_parameters(s: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => pieces.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    pieces.push(current);
    pieces
}

fn parse_parameters(pieces: impl Iterator<Item = String>) -> HashMap<String, String> {
    pieces
        .filter_map(|piece| {
            let (key, value) = piece.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .map_or_else(|| value.to_string(), |v| v.replace("\\\"", "\"").replace("\\\\", "\\"));
            (!key.is_empty()).then_some((key, value))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/Plain; Charset=utf-8").unwrap();
        assert_eq!(ct.essence(), "text/plain");
        assert_eq!(ct.charset(), Some("utf-8"));
        assert!(ct.is("text/plain"));
        assert!(!ct.is("text/html"));
    }

    #[test]
    fn test_content_type_parse_quoted_semicolon() {
        let ct = ContentType::parse("multipart/signed; boundary=\"a;b\"; protocol=\"application/pgp-signature\"").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("a;b"));
        assert_eq!(
            ct.parameters.get("protocol").map(String::as_str),
            Some("application/pgp-signature")
        );
    }

    #[test]
    fn test_content_type_parse_invalid() {
        assert!(ContentType::parse("").is_err());
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("/plain").is_err());
    }

    #[test]
    fn test_content_type_display() {
        let ct = ContentType::new("text", "plain").with_parameter("charset", "utf-8");
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_disposition_parse() {
        let cd = ContentDisposition::parse("attachment; filename=\"x.pdf\"");
        assert_eq!(cd.kind, "attachment");
        assert_eq!(cd.filename(), Some("x.pdf"));
        assert!(!cd.is_inline());
        assert!(ContentDisposition::parse("INLINE").is_inline());
    }
}
