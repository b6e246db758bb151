//! The crypto collaborator interface.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{CryptoError, Error, Result};

/// Outcome of verifying or decrypting an envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustStatus {
    /// A signature was found and checked.
    pub verified: bool,
    /// The signature checked out.
    pub good: bool,
    /// Who signed, as reported by the engine.
    pub signer: String,
    /// Free-form engine detail (key ID, failure reason).
    pub detail: String,
}

impl TrustStatus {
    /// A good signature by `signer`.
    #[must_use]
    pub fn good(signer: impl Into<String>) -> Self {
        Self {
            verified: true,
            good: true,
            signer: signer.into(),
            detail: String::new(),
        }
    }

    /// A signature that was checked and failed.
    #[must_use]
    pub fn bad(signer: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            verified: true,
            good: false,
            signer: signer.into(),
            detail: detail.into(),
        }
    }

    /// Nothing was signed; used for decrypted content without a signature.
    #[must_use]
    pub fn unsigned(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            ..Self::default()
        }
    }
}

/// Plaintext and status from a decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    /// The decrypted RFC 5322 message.
    pub plaintext: Vec<u8>,
    /// Signature status of the plaintext, if it was also signed.
    pub status: TrustStatus,
}

/// An external OpenPGP / S/MIME engine.
///
/// Engine failures are reported as [`Error::Crypto`]; an interrupted
/// context as [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
pub trait CryptoEngine: Send + Sync + 'static {
    /// Verifies `signed` against a detached OpenPGP signature.
    fn verify(
        &self,
        signed: &[u8],
        signature: &[u8],
        ctx: &Context,
    ) -> impl Future<Output = Result<TrustStatus>> + Send;

    /// Verifies `signed` against a detached S/MIME (PKCS #7) signature.
    fn verify_smime(
        &self,
        signed: &[u8],
        signature: &[u8],
        ctx: &Context,
    ) -> impl Future<Output = Result<TrustStatus>> + Send {
        let _ = (signed, signature, ctx);
        async { Err(Error::Crypto(CryptoError::UnsupportedScheme("S/MIME".to_string()))) }
    }

    /// Verifies a clear-signed armored block.
    fn verify_inline(
        &self,
        block: &str,
        ctx: &Context,
    ) -> impl Future<Output = Result<TrustStatus>> + Send;

    /// Decrypts an OpenPGP message.
    fn decrypt(
        &self,
        ciphertext: &[u8],
        ctx: &Context,
    ) -> impl Future<Output = Result<Decrypted>> + Send;
}
