//! Recursive MIME part tree.
//!
//! A [`MimePart`] is either a [`Leaf`] carrying content or a [`Container`]
//! of child parts. Trees come from two places: the provider's structured
//! payload, whose leaf bodies arrive in the provider base64 variant, and raw
//! RFC 5322 text (for example decrypted plaintext), whose leaf bodies still
//! carry their content transfer encoding.

use crate::content_type::ContentDisposition;
use crate::encoding::{decode_base64url, decode_charset, normalize};
use crate::error::{Error, Result};
use crate::header::Headers;

/// Nesting depth past which raw input is rejected.
pub const MAX_DEPTH: usize = 32;

/// Body of a leaf part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafBody {
    /// Provider payload body.
    Provider {
        /// Inline data in the provider base64 variant.
        data: Option<String>,
        /// Attachment handle when the data must be fetched separately.
        attachment_id: Option<String>,
        /// Decoded size in bytes as reported by the provider.
        size: u64,
    },
    /// Bytes taken from raw message text, still transfer-encoded.
    Raw(Vec<u8>),
}

/// A content-bearing part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    /// Lowercased `type/subtype`.
    pub mime_type: String,
    /// Part headers in original order.
    pub headers: Headers,
    /// Provider-reported filename, if any.
    pub filename: Option<String>,
    /// The encoded body.
    pub body: LeafBody,
}

impl Leaf {
    /// Builds a provider-style leaf holding `text` as UTF-8.
    #[must_use]
    pub fn text(mime_type: &str, text: &str) -> Self {
        let mut headers = Headers::new();
        headers.add("Content-Type", format!("{mime_type}; charset=utf-8"));
        Self {
            mime_type: mime_type.to_ascii_lowercase(),
            headers,
            filename: None,
            body: LeafBody::Provider {
                data: Some(crate::encoding::encode_base64url(text.as_bytes())),
                attachment_id: None,
                size: text.len() as u64,
            },
        }
    }

    /// Removes all encodings and returns the body bytes.
    ///
    /// Charset conversion is not applied. A provider leaf with no inline
    /// data yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid for its encoding.
    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        match &self.body {
            LeafBody::Provider { data, .. } => data
                .as_deref()
                .map_or_else(|| Ok(Vec::new()), decode_base64url),
            LeafBody::Raw(raw) => {
                let encoding = self.headers.get("content-transfer-encoding").map_or(
                    crate::encoding::TransferEncoding::SevenBit,
                    crate::encoding::TransferEncoding::parse,
                );
                encoding.decode(raw)
            }
        }
    }

    /// Decodes the body to UTF-8 text using the part's charset.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid for its encoding.
    pub fn decode_text(&self) -> Result<String> {
        match &self.body {
            LeafBody::Provider { .. } => {
                let bytes = self.decode_bytes()?;
                Ok(decode_charset(&bytes, self.charset().as_deref()))
            }
            LeafBody::Raw(raw) => normalize(&self.headers, raw),
        }
    }

    /// The provider attachment handle, if the body must be fetched.
    #[must_use]
    pub fn attachment_id(&self) -> Option<&str> {
        match &self.body {
            LeafBody::Provider { attachment_id, .. } => attachment_id.as_deref(),
            LeafBody::Raw(_) => None,
        }
    }

    /// Decoded size in bytes, as far as it is known without decoding.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.body {
            LeafBody::Provider { size, .. } => *size,
            LeafBody::Raw(raw) => raw.len() as u64,
        }
    }

    fn charset(&self) -> Option<String> {
        self.headers
            .content_type()
            .ok()
            .and_then(|ct| ct.charset().map(str::to_string))
    }
}

/// A multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Lowercased `multipart/subtype`.
    pub mime_type: String,
    /// Part headers in original order.
    pub headers: Headers,
    /// Child parts in order.
    pub children: Vec<MimePart>,
}

/// One node of a MIME tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimePart {
    /// Content.
    Leaf(Leaf),
    /// Multipart container.
    Container(Container),
}

impl MimePart {
    /// Lowercased `type/subtype` of this part.
    #[must_use]
    pub fn mime_type(&self) -> &str {
        match self {
            Self::Leaf(leaf) => &leaf.mime_type,
            Self::Container(container) => &container.mime_type,
        }
    }

    /// Headers of this part.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        match self {
            Self::Leaf(leaf) => &leaf.headers,
            Self::Container(container) => &container.headers,
        }
    }

    /// Whether the part carries a `Content-Disposition` other than `inline`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.headers()
            .get("content-disposition")
            .is_some_and(|value| !ContentDisposition::parse(value).is_inline())
    }

    /// Filename from the provider, the disposition, or the content type
    /// `name` parameter, in that order.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        if let Self::Leaf(leaf) = self
            && let Some(name) = leaf.filename.as_deref().filter(|n| !n.is_empty())
        {
            return Some(name.to_string());
        }
        let headers = self.headers();
        headers
            .get("content-disposition")
            .and_then(|v| ContentDisposition::parse(v).filename().map(str::to_string))
            .or_else(|| {
                headers
                    .content_type()
                    .ok()
                    .and_then(|ct| ct.name().map(str::to_string))
            })
            .filter(|n| !n.is_empty())
    }

    /// Parses a raw RFC 5322 message (or MIME entity) into a tree.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed headers, a multipart type without a
    /// boundary, or nesting deeper than [`MAX_DEPTH`].
    pub fn parse(raw: &[u8]) -> Result<Self> {
        parse_entity(raw, 0)
    }
}

fn parse_entity(raw: &[u8], depth: usize) -> Result<MimePart> {
    if depth > MAX_DEPTH {
        return Err(Error::InvalidMultipart("nesting too deep".to_string()));
    }

    let (head, body) = split_head_body(raw);
    let headers = Headers::parse(&String::from_utf8_lossy(head))?;
    let content_type = headers.content_type()?;

    if !content_type.is_multipart() {
        return Ok(MimePart::Leaf(Leaf {
            mime_type: content_type.essence(),
            headers,
            filename: None,
            body: LeafBody::Raw(body.to_vec()),
        }));
    }

    let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?;
    let children = split_multipart(body, boundary)?
        .into_iter()
        .map(|part| parse_entity(part, depth + 1))
        .collect::<Result<Vec<_>>>()?;

    Ok(MimePart::Container(Container {
        mime_type: content_type.essence(),
        headers,
        children,
    }))
}

/// Splits an entity at the first empty line into header and body bytes.
///
/// Input without an empty line is all header.
#[must_use]
pub fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return (&[], &raw[2..]);
    }
    if raw.starts_with(b"\n") {
        return (&[], &raw[1..]);
    }
    let crlf = find(raw, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find(raw, b"\n\n").map(|i| (i, i + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    split.map_or((raw, &[][..]), |(end, start)| (&raw[..end], &raw[start..]))
}

/// Splits a multipart body into the exact bytes of each body part.
///
/// The line break before each delimiter belongs to the delimiter and is
/// not part of the preceding body part. The preamble and epilogue are
/// dropped.
///
/// # Errors
///
/// Returns an error if no delimiter line is found.
pub fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut part_start: Option<usize> = None;
    let mut line_start = 0;
    let mut seen_delimiter = false;

    while line_start < body.len() {
        let line_end = body[line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| line_start + i + 1);
        let line = trim_line_end(&body[line_start..line_end]);

        if let Some(rest) = line.strip_prefix(delimiter) {
            let rest = trim_trailing_space(rest);
            let closing = rest == b"--";
            if rest.is_empty() || closing {
                seen_delimiter = true;
                if let Some(start) = part_start.take() {
                    let end = strip_preceding_newline(body, start, line_start);
                    parts.push(&body[start..end]);
                }
                if closing {
                    break;
                }
                part_start = Some(line_end);
            }
        }
        line_start = line_end;
    }

    // Tolerate a missing closing delimiter.
    if let Some(start) = part_start
        && start <= body.len()
    {
        parts.push(&body[start..]);
    }

    if !seen_delimiter {
        return Err(Error::InvalidMultipart(format!(
            "no delimiter for boundary {boundary:?}"
        )));
    }
    Ok(parts)
}

fn strip_preceding_newline(body: &[u8], start: usize, delimiter_start: usize) -> usize {
    let mut end = delimiter_start;
    if end > start && body[end - 1] == b'\n' {
        end -= 1;
        if end > start && body[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn trim_trailing_space(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t'))
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl From<Leaf> for MimePart {
    fn from(leaf: Leaf) -> Self {
        Self::Leaf(leaf)
    }
}

impl From<Container> for MimePart {
    fn from(container: Container) -> Self {
        Self::Container(container)
    }
}
