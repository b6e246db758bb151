//! Signed and encrypted envelopes.
//!
//! Detects RFC 3156 / S/MIME envelope shapes on the root part, fetches the
//! detached signature or ciphertext, and hands the work to the injected
//! [`CryptoEngine`]. Also scans rendered text for clear-signed blocks.
//!
//! Crypto and decode failures come back as errors for the load to contain
//! and render inline. Failed provider round trips and interruptions abort
//! the load (see [`Error::aborts_load`]).

mod crypto;
mod gpg;

use std::ops::Range;
use std::sync::{Arc, LazyLock};

use cmdmail_mime::encoding::{decode_base64url, strip_unprintable};
use cmdmail_mime::{Container, Leaf, MimePart, split_head_body, split_multipart};
use regex::Regex;

pub use crypto::{CryptoEngine, Decrypted, TrustStatus};
pub use gpg::GpgEngine;

use crate::context::Context;
use crate::display::{GREEN, RESET};
use crate::entity::{Attachment, EntityKind};
use crate::error::{CryptoError, Error, Result};
use crate::materialize::{Reducer, collect_attachments};
use crate::provider::{MailProvider, MessageFormat};
use crate::render::HtmlRenderer;

const MULTIPART_SIGNED: &str = "multipart/signed";
const MULTIPART_ENCRYPTED: &str = "multipart/encrypted";

#[allow(clippy::expect_used)]
static INLINE_SIGNED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)-----BEGIN PGP SIGNED MESSAGE-----.*?-----BEGIN PGP SIGNATURE-----.*?-----END PGP SIGNATURE-----",
    )
    .expect("inline signature pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    OpenPgp,
    Smime,
}

/// Renderings and status recovered from an encrypted envelope.
#[derive(Debug)]
pub(crate) struct Decryption {
    pub body: String,
    pub body_html: String,
    pub status: TrustStatus,
    pub attachments: Vec<Arc<Attachment>>,
}

/// Inline signature scan result.
#[derive(Debug, Default)]
pub(crate) struct InlineScan {
    pub body: String,
    pub failures: Vec<CryptoError>,
}

/// Where to fetch signature, ciphertext and raw source for one entity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Source<'a> {
    pub kind: EntityKind,
    /// Pool ID of the entity (the draft ID for drafts).
    pub entity_id: &'a str,
    /// ID of the underlying message, which owns the attachments.
    pub message_id: &'a str,
}

pub(crate) struct TrustEngine<'a, P, C, R> {
    provider: &'a P,
    crypto: &'a C,
    reducer: Reducer<'a, R>,
    source: Source<'a>,
    ctx: &'a Context,
}

impl<'a, P, C, R> TrustEngine<'a, P, C, R>
where
    P: MailProvider,
    C: CryptoEngine,
    R: HtmlRenderer,
{
    pub(crate) const fn new(
        provider: &'a P,
        crypto: &'a C,
        renderer: &'a R,
        source: Source<'a>,
        ctx: &'a Context,
    ) -> Self {
        Self {
            provider,
            crypto,
            reducer: Reducer::new(renderer, ctx),
            source,
            ctx,
        }
    }

    /// Verifies a `multipart/signed` root. `Ok(None)` for any other root.
    ///
    /// `raw` is the entity's cached raw message; it is filled in when the
    /// signed content is itself multipart and has to be cut from the raw
    /// source.
    pub(crate) async fn verify_signed(
        &self,
        root: &MimePart,
        raw: &mut Option<Arc<Vec<u8>>>,
    ) -> Result<Option<TrustStatus>> {
        let MimePart::Container(envelope) = root else {
            return Ok(None);
        };
        if envelope.mime_type != MULTIPART_SIGNED {
            return Ok(None);
        }

        let mut content = None;
        let mut signature = None;
        for (index, child) in envelope.children.iter().enumerate() {
            match (child.mime_type(), child) {
                ("application/pgp-signature", MimePart::Leaf(leaf)) => {
                    signature = Some((Scheme::OpenPgp, leaf));
                }
                (
                    "application/pkcs7-signature" | "application/x-pkcs7-signature",
                    MimePart::Leaf(leaf),
                ) => signature = Some((Scheme::Smime, leaf)),
                _ if content.is_none() => content = Some((index, child)),
                (mime_type, _) => {
                    tracing::warn!(mime_type, "Unexpected part in signed envelope");
                }
            }
        }

        let (scheme, signature) = signature.ok_or(CryptoError::NoSignatureFound)?;
        let (index, content) = content
            .ok_or_else(|| Error::Decode("signed envelope has no content part".to_string()))?;

        let signed = match content {
            MimePart::Leaf(leaf) => canonical_text(leaf)?,
            MimePart::Container(_) => {
                let source = match raw {
                    Some(source) => Arc::clone(source),
                    None => {
                        let fetched = Arc::new(self.fetch_raw().await?);
                        *raw = Some(Arc::clone(&fetched));
                        fetched
                    }
                };
                signed_part_from_raw(&source, envelope, index)?
            }
        };
        let signature = self.part_bytes(signature).await?;

        let status = match scheme {
            Scheme::OpenPgp => self.crypto.verify(&signed, &signature, self.ctx).await?,
            Scheme::Smime => {
                self.crypto
                    .verify_smime(&signed, &signature, self.ctx)
                    .await?
            }
        };
        tracing::info!(
            id = self.source.entity_id,
            ?scheme,
            good = status.good,
            signer = %status.signer,
            "Checked signature"
        );
        Ok(Some(status))
    }

    /// Decrypts a `multipart/encrypted` root. `Ok(None)` for any other root.
    pub(crate) async fn decrypt(&self, root: &MimePart) -> Result<Option<Decryption>> {
        let MimePart::Container(envelope) = root else {
            return Ok(None);
        };
        if envelope.mime_type != MULTIPART_ENCRYPTED {
            return Ok(None);
        }

        let mut has_control = false;
        let mut data = None;
        for child in &envelope.children {
            match (child.mime_type(), child) {
                ("application/pgp-encrypted", _) => has_control = true,
                ("application/octet-stream", MimePart::Leaf(leaf)) => data = Some(leaf),
                (mime_type, _) => {
                    tracing::warn!(mime_type, "Unexpected part in encrypted envelope");
                }
            }
        }
        if !has_control {
            tracing::warn!(
                id = self.source.entity_id,
                "Encrypted envelope has no application/pgp-encrypted part"
            );
        }
        let data = data.ok_or_else(|| {
            CryptoError::DecryptFailed("envelope has no encrypted data part".to_string())
        })?;

        let ciphertext = self.part_bytes(data).await?;
        let Decrypted { plaintext, status } = self.crypto.decrypt(&ciphertext, self.ctx).await?;
        let tree = MimePart::parse(&plaintext)?;

        let decryption = match &tree {
            MimePart::Leaf(leaf) => {
                let text = strip_unprintable(&leaf.decode_text()?);
                Decryption {
                    body: text.clone(),
                    body_html: text,
                    status,
                    attachments: Vec::new(),
                }
            }
            MimePart::Container(container) => {
                tracing::info!(mime_type = %container.mime_type, "Multipart encrypted content");
                Decryption {
                    body: self.reducer.reduce(&tree, false).await?.into_text(),
                    body_html: self.reducer.reduce(&tree, true).await?.into_text(),
                    status,
                    attachments: collect_attachments(self.source.message_id, &tree),
                }
            }
        };
        Ok(Some(decryption))
    }

    /// Verifies every clear-signed block in `body` independently.
    ///
    /// Good blocks are wrapped in begin/end lines naming the signer. Bad
    /// and unverifiable blocks are left as they are and reported in
    /// `failures`.
    pub(crate) async fn annotate_inline(&self, body: &str) -> Result<InlineScan> {
        let blocks: Vec<Range<usize>> = INLINE_SIGNED.find_iter(body).map(|m| m.range()).collect();
        if blocks.is_empty() {
            return Ok(InlineScan {
                body: body.to_string(),
                failures: Vec::new(),
            });
        }

        let mut scan = InlineScan::default();
        let mut copied = 0;
        for block in blocks {
            let text = &body[block.clone()];
            scan.body.push_str(&body[copied..block.start]);
            copied = block.end;

            match self.crypto.verify_inline(text, self.ctx).await {
                Ok(status) if status.good => {
                    let signer = &status.signer;
                    scan.body.push_str(&format!(
                        "{GREEN}BEGIN message signed by {signer}{RESET}\n{text}\n{GREEN}END message signed by {signer}{RESET}"
                    ));
                }
                Ok(status) => {
                    tracing::warn!(signer = %status.signer, detail = %status.detail, "Inline signature is not good");
                    scan.failures
                        .push(CryptoError::BadSignature(status.detail.clone()));
                    scan.body.push_str(text);
                }
                Err(e) if e.is_interruption() => return Err(e),
                Err(e) => {
                    tracing::error!(?e, "Checking inline signature");
                    scan.failures.push(CryptoError::from_contained(&e));
                    scan.body.push_str(text);
                }
            }
        }
        scan.body.push_str(&body[copied..]);
        Ok(scan)
    }

    /// Body bytes of a leaf, fetching them if they live remotely.
    async fn part_bytes(&self, leaf: &Leaf) -> Result<Vec<u8>> {
        match leaf.attachment_id() {
            Some(attachment_id) => {
                let data = self
                    .ctx
                    .run(
                        self.provider
                            .get_attachment(self.source.message_id, attachment_id),
                    )
                    .await??;
                Ok(decode_base64url(&data)?)
            }
            None => Ok(leaf.decode_bytes()?),
        }
    }

    async fn fetch_raw(&self) -> Result<Vec<u8>> {
        fetch_raw(self.provider, self.source.kind, self.source.entity_id, self.ctx).await
    }
}

/// Fetches and decodes the raw RFC 5322 source of an entity.
pub(crate) async fn fetch_raw<P: MailProvider>(
    provider: &P,
    kind: EntityKind,
    id: &str,
    ctx: &Context,
) -> Result<Vec<u8>> {
    let raw = match kind {
        EntityKind::Message => ctx.run(provider.get_message(id, MessageFormat::Raw)).await??.raw,
        EntityKind::Draft => {
            ctx.run(provider.get_draft(id, MessageFormat::Raw))
                .await??
                .message
                .raw
        }
    };
    let raw = raw.ok_or_else(|| Error::Decode(format!("no raw source returned for {id}")))?;
    Ok(decode_base64url(&raw)?)
}

/// The text a detached signature covers when the content is a single
/// part: its headers as `Name: Value` lines, a blank line, and the decoded
/// body.
fn canonical_text(leaf: &Leaf) -> Result<Vec<u8>> {
    let mut signed = format!("{}\r\n", leaf.headers).into_bytes();
    signed.extend_from_slice(&leaf.decode_bytes()?);
    Ok(signed)
}

/// The exact bytes of the `index`th body part of the signed envelope,
/// taken from the raw message.
fn signed_part_from_raw(raw: &[u8], envelope: &Container, index: usize) -> Result<Vec<u8>> {
    let content_type = envelope.headers.content_type()?;
    let boundary = content_type
        .boundary()
        .ok_or_else(|| Error::Decode("signed envelope has no boundary".to_string()))?;
    let (_, body) = split_head_body(raw);
    split_multipart(body, boundary)?
        .get(index)
        .map(|part| part.to_vec())
        .ok_or_else(|| Error::Decode("signed part missing from raw source".to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cmdmail_mime::Headers;

    use super::*;

    #[test]
    fn test_canonical_text() {
        let mut leaf = Leaf::text("text/plain", "Hello\r\n");
        leaf.headers = Headers::new();
        leaf.headers.add("Content-Type", "text/plain; charset=us-ascii");
        leaf.headers.add("Content-Transfer-Encoding", "7bit");
        assert_eq!(
            canonical_text(&leaf).unwrap(),
            b"Content-Type: text/plain; charset=us-ascii\r\nContent-Transfer-Encoding: 7bit\r\n\r\nHello\r\n"
        );
    }

    #[test]
    fn test_signed_part_from_raw() {
        let raw = concat!(
            "Content-Type: multipart/signed; boundary=\"sig\"; protocol=\"application/pgp-signature\"\r\n",
            "\r\n",
            "--sig\r\n",
            "Content-Type: multipart/mixed; boundary=\"in\"\r\n",
            "\r\n",
            "--in\r\n",
            "\r\n",
            "body\r\n",
            "--in--\r\n",
            "--sig\r\n",
            "Content-Type: application/pgp-signature\r\n",
            "\r\n",
            "SIG\r\n",
            "--sig--\r\n",
        );
        let MimePart::Container(envelope) = MimePart::parse(raw.as_bytes()).unwrap() else {
            panic!("expected container");
        };
        let part = signed_part_from_raw(raw.as_bytes(), &envelope, 0).unwrap();
        assert_eq!(
            part,
            b"Content-Type: multipart/mixed; boundary=\"in\"\r\n\r\n--in\r\n\r\nbody\r\n--in--"
        );
        assert!(signed_part_from_raw(raw.as_bytes(), &envelope, 5).is_err());
    }

    #[test]
    fn test_inline_pattern_is_not_greedy() {
        let body = concat!(
            "intro\n",
            "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\none\n",
            "-----BEGIN PGP SIGNATURE-----\nAAAA\n-----END PGP SIGNATURE-----\n",
            "middle\n",
            "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\ntwo\n",
            "-----BEGIN PGP SIGNATURE-----\nBBBB\n-----END PGP SIGNATURE-----\n",
        );
        let blocks: Vec<_> = INLINE_SIGNED.find_iter(body).collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].as_str().contains("one"));
        assert!(!blocks[0].as_str().contains("middle"));
    }
}
