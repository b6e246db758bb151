//! Byte-level transcoding.
//!
//! Covers the provider's URL-safe base64 variant, the RFC 2045 content
//! transfer encodings, charset conversion to UTF-8 and the scrubbing of
//! terminal control characters from untrusted text.

use std::fmt;

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;

use crate::error::{Error, Result};
use crate::header::Headers;

/// Standard base64 alphabet with `+` and `/` replaced by `-` and `_`.
///
/// Output is padded. Input padding is optional since the provider is not
/// consistent about it.
const PROVIDER_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encodes bytes with the provider's URL-safe base64 variant.
#[must_use]
pub fn encode_base64url(data: &[u8]) -> String {
    PROVIDER_BASE64.encode(data)
}

/// Decodes the provider's URL-safe base64 variant.
///
/// Characters from the standard alphabet that the variant replaces (`+`
/// and `/`) are rejected.
///
/// # Errors
///
/// Returns an error if the input is not valid for the variant.
pub fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    PROVIDER_BASE64.decode(data.trim()).map_err(Into::into)
}

/// Decodes standard base64, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains an invalid escape sequence.
pub fn decode_quoted_printable(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        let rest = &data[i + 1..];
        if rest.starts_with(b"\r\n") {
            i += 3;
            continue;
        }
        if rest.starts_with(b"\n") {
            i += 2;
            continue;
        }
        // Transport padding before a soft line break.
        let padding = rest
            .iter()
            .position(|b| *b != b' ' && *b != b'\t')
            .unwrap_or(rest.len());
        if padding > 0 {
            let after = &rest[padding..];
            if after.is_empty() {
                break;
            }
            let newline = if after.starts_with(b"\r\n") {
                2
            } else if after.starts_with(b"\n") {
                1
            } else {
                0
            };
            if newline > 0 {
                i += 1 + padding + newline;
                continue;
            }
        }

        match (rest.first(), rest.get(1)) {
            (Some(&hi), Some(&lo)) => {
                let value = hex_value(hi)
                    .zip(hex_value(lo))
                    .map(|(h, l)| (h << 4) | l)
                    .ok_or_else(|| {
                        Error::InvalidEncoding(format!(
                            "Invalid hex escape: ={}{}",
                            char::from(hi),
                            char::from(lo)
                        ))
                    })?;
                result.push(value);
                i += 3;
            }
            _ => {
                return Err(Error::InvalidEncoding(
                    "Incomplete escape sequence".to_string(),
                ));
            }
        }
    }

    Ok(result)
}

const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Content transfer encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit data.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses a `Content-Transfer-Encoding` value. Unknown values are
    /// treated as 7bit.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }

    /// Removes this transfer encoding from `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid for the encoding.
    pub fn decode(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(data),
            Self::QuotedPrintable => decode_quoted_printable(data),
            Self::SevenBit | Self::EightBit | Self::Binary => Ok(data.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Converts `data` in the named charset to UTF-8.
///
/// A missing charset is read as UTF-8. An unknown charset is passed
/// through (lossily, as UTF-8) and logged.
#[must_use]
pub fn decode_charset(data: &[u8], charset: Option<&str>) -> String {
    let Some(label) = charset.map(str::trim).filter(|c| !c.is_empty()) else {
        return String::from_utf8_lossy(data).into_owned();
    };

    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) => {
            let (text, _, had_errors) = encoding.decode(data);
            if had_errors {
                tracing::debug!(charset = label, "Replaced malformed sequences");
            }
            text.into_owned()
        }
        None => {
            tracing::warn!(charset = label, "No decoder for charset");
            String::from_utf8_lossy(data).into_owned()
        }
    }
}

/// Applies the transfer encoding and then the charset named by `headers`,
/// yielding UTF-8 text.
///
/// # Errors
///
/// Returns an error if the transfer encoding cannot be removed.
pub fn normalize(headers: &Headers, body: &[u8]) -> Result<String> {
    let encoding = headers
        .get("content-transfer-encoding")
        .map_or(TransferEncoding::SevenBit, TransferEncoding::parse);
    let decoded = encoding.decode(body)?;
    let charset = headers.content_type().ok().and_then(|ct| ct.charset().map(str::to_string));
    Ok(decode_charset(&decoded, charset.as_deref()))
}

/// Removes characters that could drive a terminal from untrusted text.
///
/// Strips escape, carriage return, the C1 control sequence introducer and
/// every other C0 control except tab and newline.
#[must_use]
pub fn strip_unprintable(text: &str) -> String {
    text.chars()
        .filter(|&c| match c {
            '\t' | '\n' => true,
            '\u{9b}' => false,
            c => !c.is_ascii_control(),
        })
        .collect()
}
