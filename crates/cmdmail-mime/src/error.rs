//! Error types for MIME operations.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Invalid MIME header.
    #[error("Invalid MIME header: {0}")]
    InvalidHeader(String),

    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Invalid transfer encoding.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Missing boundary in multipart message.
    #[error("Missing boundary in multipart message")]
    MissingBoundary,

    /// Invalid multipart structure.
    #[error("Invalid multipart structure: {0}")]
    InvalidMultipart(String),

    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),
}
