//! MIME header handling.

use std::fmt;

use crate::content_type::ContentType;
use crate::error::{Error, Result};

/// An ordered list of header fields.
///
/// Field names keep their original spelling and order, which matters when
/// reconstructing signed content. Lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header field.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Sets a header value, replacing any existing fields of that name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Gets all values for a header, in order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Removes all fields with the given name.
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Returns an iterator over all fields in their original order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses the `Content-Type` field, defaulting to `text/plain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is present but malformed.
    pub fn content_type(&self) -> Result<ContentType> {
        self.get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Parses a header block.
    ///
    /// Parsing stops at the first empty line. Folded continuation lines are
    /// joined with a single space.
    ///
    /// # Errors
    ///
    /// Returns an error if a non-continuation line has no colon.
    pub fn parse(text: &str) -> Result<Self> {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::InvalidHeader(line.to_string()))?;
            current = Some((name.trim().to_string(), value.trim().to_string()));
        }

        if let Some((name, value)) = current {
            headers.add(name, value);
        }

        Ok(headers)
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Renders each field as `Name: Value` followed by CRLF.
impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
