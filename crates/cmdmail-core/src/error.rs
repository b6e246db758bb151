//! Error types for the core library.

use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`MailProvider`](crate::MailProvider).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Network or transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Failures of the signature and encryption pipeline.
///
/// These are contained by the load operation: they end up as inline
/// markers or diagnostics, never as a failed load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The envelope uses a scheme the engine cannot handle.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// A signed envelope had no recognized signature part.
    #[error("no supported signature found")]
    NoSignatureFound,

    /// The signature was checked and did not verify.
    #[error("bad signature: {0}")]
    BadSignature(String),

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    /// The external engine failed to run or produced unusable output.
    #[error("crypto engine failure: {0}")]
    Engine(String),
}

impl CryptoError {
    /// Reduces any contained load error to a diagnostic entry.
    #[must_use]
    pub fn from_contained(err: &Error) -> Self {
        match err {
            Error::Crypto(crypto) => crypto.clone(),
            other => Self::Engine(other.to_string()),
        }
    }
}

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A requested header or field is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider could not be reached or refused the request.
    #[error("remote fetch failed: {0}")]
    RemoteFetch(#[from] ProviderError),

    /// Malformed base64, MIME structure or provider response.
    #[error("decode error: {0}")]
    Decode(String),

    /// Signature or decryption failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The HTML renderer exceeded its time limit.
    #[error("HTML rendering timed out after {0:?}")]
    RenderTimeout(Duration),

    /// The HTML renderer failed.
    #[error("HTML rendering failed: {0}")]
    Render(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The operation does not apply to this entity.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Whether the caller interrupted the operation.
    #[must_use]
    pub const fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Whether the failure must abort a load instead of being rendered
    /// inline: interruptions and failed provider round trips.
    #[must_use]
    pub const fn aborts_load(&self) -> bool {
        matches!(
            self,
            Self::RemoteFetch(_) | Self::Cancelled | Self::DeadlineExceeded
        )
    }
}

impl From<cmdmail_mime::Error> for Error {
    fn from(err: cmdmail_mime::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborts_load() {
        assert!(Error::Cancelled.aborts_load());
        assert!(Error::RemoteFetch(ProviderError::Transport("reset".into())).aborts_load());
        assert!(!Error::Decode("bad".into()).aborts_load());
        assert!(!Error::Crypto(CryptoError::NoSignatureFound).aborts_load());
    }

    #[test]
    fn test_contained_crypto_error() {
        let err = Error::Crypto(CryptoError::BadSignature("key 1".into()));
        assert_eq!(
            CryptoError::from_contained(&err),
            CryptoError::BadSignature("key 1".into())
        );

        let err = Error::Decode("bad base64".into());
        assert!(matches!(
            CryptoError::from_contained(&err),
            CryptoError::Engine(msg) if msg.contains("bad base64")
        ));
    }

    #[test]
    fn test_mime_error_is_decode() {
        let err: Error = cmdmail_mime::Error::MissingBoundary.into();
        assert!(matches!(err, Error::Decode(_)));
    }
}
