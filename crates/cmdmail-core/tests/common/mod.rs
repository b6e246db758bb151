//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cmdmail_core::{
    Connection, Context, CryptoEngine, CryptoError, Decrypted, Error, HtmlRenderer,
    MemoryProvider, Result, TrustStatus,
};

pub const SIGNER: &str = "Alice Example <alice@example.com>";

/// Marker that makes [`ScriptedCrypto::verify_inline`] report a good
/// signature.
pub const GOOD_INLINE: &str = "iQEzBAEBCAAdFiEEgood";
/// Marker that makes [`ScriptedCrypto::verify_inline`] fail to run.
pub const BROKEN_INLINE: &str = "iQEzBAEBCAAdFiEEbroken";

/// Prefix of a ciphertext [`ScriptedCrypto`] can "decrypt".
pub const CIPHER_PREFIX: &[u8] = b"ENCRYPTED:";

/// FNV-1a based stand-in for a detached signature over `data`.
pub fn fake_signature(data: &[u8]) -> Vec<u8> {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    format!("FAKESIG {hash:016x}").into_bytes()
}

/// Crypto engine with deterministic, scriptable answers.
#[derive(Debug, Default)]
pub struct ScriptedCrypto {
    pub verifies: Arc<AtomicUsize>,
    pub inline_checks: Arc<AtomicUsize>,
    pub decrypts: Arc<AtomicUsize>,
}

impl ScriptedCrypto {
    fn check(signed: &[u8], signature: &[u8], signer: &str) -> TrustStatus {
        if signature.trim_ascii() == fake_signature(signed).as_slice() {
            TrustStatus::good(signer)
        } else {
            TrustStatus::bad(signer, "BAD signature")
        }
    }
}

impl CryptoEngine for ScriptedCrypto {
    async fn verify(&self, signed: &[u8], signature: &[u8], _ctx: &Context) -> Result<TrustStatus> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        Ok(Self::check(signed, signature, SIGNER))
    }

    async fn verify_smime(
        &self,
        signed: &[u8],
        signature: &[u8],
        _ctx: &Context,
    ) -> Result<TrustStatus> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        Ok(Self::check(signed, signature, "CN=Alice Example"))
    }

    async fn verify_inline(&self, block: &str, _ctx: &Context) -> Result<TrustStatus> {
        self.inline_checks.fetch_add(1, Ordering::SeqCst);
        if block.contains(BROKEN_INLINE) {
            return Err(Error::Crypto(CryptoError::Engine("gpg exited with 2".into())));
        }
        if block.contains(GOOD_INLINE) {
            Ok(TrustStatus::good(SIGNER))
        } else {
            Ok(TrustStatus::bad(SIGNER, "BAD signature"))
        }
    }

    async fn decrypt(&self, ciphertext: &[u8], _ctx: &Context) -> Result<Decrypted> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        let plaintext = ciphertext
            .trim_ascii()
            .strip_prefix(CIPHER_PREFIX)
            .ok_or_else(|| CryptoError::DecryptFailed("no secret key".into()))?;
        Ok(Decrypted {
            plaintext: plaintext.to_vec(),
            status: TrustStatus::good(SIGNER),
        })
    }
}

/// Uppercasing renderer that counts calls and can be made slow or
/// failing.
#[derive(Debug, Default)]
pub struct CountingRenderer {
    pub calls: Arc<AtomicUsize>,
    pub delay: Option<Duration>,
    pub time_out: bool,
}

impl CountingRenderer {
    /// Handle on the call counter that stays usable after the renderer
    /// moves into a connection.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

impl HtmlRenderer for CountingRenderer {
    async fn render_to_text(&self, html: &str, ctx: &Context) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            ctx.run(tokio::time::sleep(delay)).await?;
        }
        if self.time_out {
            return Err(Error::RenderTimeout(Duration::from_secs(10)));
        }
        Ok(html.to_uppercase())
    }
}

pub type TestConnection = Connection<MemoryProvider, ScriptedCrypto, CountingRenderer>;

pub fn connection(provider: MemoryProvider) -> TestConnection {
    Connection::new(provider, ScriptedCrypto::default(), CountingRenderer::default())
}

pub fn connection_with_renderer(
    provider: MemoryProvider,
    renderer: CountingRenderer,
) -> TestConnection {
    Connection::new(provider, ScriptedCrypto::default(), renderer)
}

pub const PLAIN: &str = concat!(
    "From: Alice Example <alice@example.com>\r\n",
    "To: bob@example.com\r\n",
    "Subject: Lunch\r\n",
    "Date: Tue, 4 Jun 2024 10:00:00 +0000\r\n",
    "Content-Type: text/plain; charset=utf-8\r\n",
    "\r\n",
    "Noon works.\r\n",
);

pub const ALTERNATIVE: &str = concat!(
    "From: Alice Example <alice@example.com>\r\n",
    "Subject: Alternatives\r\n",
    "Content-Type: multipart/alternative; boundary=\"alt\"\r\n",
    "\r\n",
    "--alt\r\n",
    "Content-Type: text/plain; charset=utf-8\r\n",
    "\r\n",
    "hello\r\n",
    "--alt\r\n",
    "Content-Type: text/html; charset=utf-8\r\n",
    "\r\n",
    "<b>hi</b>\r\n",
    "--alt--\r\n",
);

pub const WITH_PDF: &str = concat!(
    "From: Alice Example <alice@example.com>\r\n",
    "Subject: Report\r\n",
    "Content-Type: multipart/mixed; boundary=\"mix\"\r\n",
    "\r\n",
    "--mix\r\n",
    "Content-Type: text/plain; charset=utf-8\r\n",
    "\r\n",
    "Report attached.\r\n",
    "--mix\r\n",
    "Content-Type: application/pdf; name=\"x.pdf\"\r\n",
    "Content-Disposition: attachment; filename=\"x.pdf\"\r\n",
    "Content-Transfer-Encoding: base64\r\n",
    "\r\n",
    "JVBERi0xLjQKJcOkw7zDtsOf\r\n",
    "--mix--\r\n",
);

/// Decoded contents of the attachment in [`WITH_PDF`].
pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n%\xc3\xa4\xc3\xbc\xc3\xb6\xc3\x9f";
