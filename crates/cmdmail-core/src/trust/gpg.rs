//! [`CryptoEngine`] backed by the `gpg` and `openssl` command-line tools.

use std::ffi::OsString;
use std::io::Write;
use std::process::{Output, Stdio};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::crypto::{CryptoEngine, Decrypted, TrustStatus};
use crate::config::CryptoConfig;
use crate::context::Context;
use crate::error::{CryptoError, Error, Result};

const STATUS_PREFIX: &str = "[GNUPG:] ";

/// Signature and decryption facts reported on gpg's status channel.
#[derive(Debug, Default, PartialEq, Eq)]
struct GpgStatus {
    good: Option<String>,
    bad: Option<String>,
    errsig: Option<String>,
    fingerprint: Option<String>,
    decryption_okay: bool,
    decryption_failed: bool,
    no_seckey: Vec<String>,
}

impl GpgStatus {
    fn parse(text: &str) -> Self {
        let mut status = Self::default();
        for line in text.lines() {
            let Some(line) = line.trim_end().strip_prefix(STATUS_PREFIX) else {
                continue;
            };
            let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
            match keyword {
                "GOODSIG" => status.good = Some(user_id(rest)),
                "BADSIG" => status.bad = Some(user_id(rest)),
                "ERRSIG" => {
                    status.errsig = rest.split_whitespace().next().map(str::to_string);
                }
                "VALIDSIG" => {
                    status.fingerprint = rest.split_whitespace().next().map(str::to_string);
                }
                "DECRYPTION_OKAY" => status.decryption_okay = true,
                "DECRYPTION_FAILED" => status.decryption_failed = true,
                "NO_SECKEY" => status.no_seckey.push(rest.trim().to_string()),
                _ => {}
            }
        }
        status
    }

    fn trust(&self) -> Option<TrustStatus> {
        if let Some(signer) = &self.good {
            let mut status = TrustStatus::good(signer.clone());
            status.detail = self.fingerprint.clone().unwrap_or_default();
            return Some(status);
        }
        if let Some(signer) = &self.bad {
            return Some(TrustStatus::bad(signer.clone(), "BAD signature"));
        }
        self.errsig.as_ref().map(|key| TrustStatus {
            verified: false,
            good: false,
            signer: key.clone(),
            detail: format!("could not check signature by key {key}"),
        })
    }
}

/// `GOODSIG <keyid> <user id>` carries the user ID after the key.
fn user_id(rest: &str) -> String {
    rest.split_once(' ')
        .map_or(rest, |(_, user)| user)
        .trim()
        .to_string()
}

/// Shells out to `gpg` for OpenPGP and `openssl smime` for S/MIME.
#[derive(Debug, Clone)]
pub struct GpgEngine {
    gpg: String,
    openssl: String,
    timeout: Duration,
}

impl Default for GpgEngine {
    fn default() -> Self {
        Self::from_config(&CryptoConfig::default())
    }
}

impl GpgEngine {
    /// Creates an engine from configuration.
    #[must_use]
    pub fn from_config(config: &CryptoConfig) -> Self {
        Self {
            gpg: config.gpg.clone(),
            openssl: config.openssl.clone(),
            timeout: config.timeout(),
        }
    }

    async fn run(
        &self,
        program: &str,
        args: Vec<OsString>,
        stdin: &[u8],
        ctx: &Context,
    ) -> Result<Output> {
        let spawn_and_wait = async {
            let mut child = Command::new(program)
                .args(&args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| CryptoError::Engine(format!("spawning {program}: {e}")))?;

            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| CryptoError::Engine(format!("{program} stdin unavailable")))?;
            let input = stdin.to_vec();
            let write = async move {
                pipe.write_all(&input).await?;
                pipe.shutdown().await
            };
            let (written, output) = tokio::join!(write, child.wait_with_output());
            if let Err(e) = written {
                tracing::debug!(?e, program, "Engine closed stdin early");
            }
            output.map_err(|e| CryptoError::Engine(format!("waiting for {program}: {e}")))
        };

        let output = tokio::time::timeout(self.timeout, ctx.run(spawn_and_wait))
            .await
            .map_err(|_| {
                CryptoError::Engine(format!("{program} timed out after {:?}", self.timeout))
            })???;
        Ok(output)
    }

    fn scratch_file(contents: &[u8]) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new().prefix("cmdmail-").tempfile()?;
        file.write_all(contents)?;
        file.flush()?;
        Ok(file)
    }

    fn gpg_args(extra: &[&str]) -> Vec<OsString> {
        ["--batch", "--no-tty", "--status-fd", "2"]
            .iter()
            .chain(extra)
            .map(OsString::from)
            .collect()
    }
}

fn stderr_tail(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .rev()
        .find(|l| !l.starts_with(STATUS_PREFIX) && !l.trim().is_empty())
        .unwrap_or_default()
        .trim()
        .to_string()
}

impl CryptoEngine for GpgEngine {
    async fn verify(&self, signed: &[u8], signature: &[u8], ctx: &Context) -> Result<TrustStatus> {
        let sig_file = Self::scratch_file(signature)?;
        let mut args = Self::gpg_args(&["--verify"]);
        args.push(sig_file.path().into());
        args.push("-".into());

        let output = self.run(&self.gpg, args, signed, ctx).await?;
        let status = GpgStatus::parse(&String::from_utf8_lossy(&output.stderr));
        status.trust().ok_or_else(|| {
            Error::Crypto(CryptoError::Engine(format!(
                "no signature status from gpg: {}",
                stderr_tail(&output)
            )))
        })
    }

    async fn verify_smime(
        &self,
        signed: &[u8],
        signature: &[u8],
        ctx: &Context,
    ) -> Result<TrustStatus> {
        let sig_file = Self::scratch_file(signature)?;
        let content_file = Self::scratch_file(signed)?;
        let mut args: Vec<OsString> = ["smime", "-verify", "-binary", "-noverify", "-inform", "DER"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push("-in".into());
        args.push(sig_file.path().into());
        args.push("-content".into());
        args.push(content_file.path().into());

        let output = self.run(&self.openssl, args, &[], ctx).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            return Ok(TrustStatus {
                verified: true,
                good: true,
                signer: String::new(),
                detail: stderr.trim().to_string(),
            });
        }
        if stderr.contains("signature failure") || stderr.contains("digest failure") {
            return Ok(TrustStatus::bad("", stderr_tail(&output)));
        }
        Err(Error::Crypto(CryptoError::Engine(format!(
            "openssl smime: {}",
            stderr_tail(&output)
        ))))
    }

    async fn verify_inline(&self, block: &str, ctx: &Context) -> Result<TrustStatus> {
        let output = self
            .run(&self.gpg, Self::gpg_args(&["--verify"]), block.as_bytes(), ctx)
            .await?;
        let status = GpgStatus::parse(&String::from_utf8_lossy(&output.stderr));
        status.trust().ok_or_else(|| {
            Error::Crypto(CryptoError::Engine(format!(
                "no signature status from gpg: {}",
                stderr_tail(&output)
            )))
        })
    }

    async fn decrypt(&self, ciphertext: &[u8], ctx: &Context) -> Result<Decrypted> {
        let output = self
            .run(&self.gpg, Self::gpg_args(&["--decrypt"]), ciphertext, ctx)
            .await?;
        let status = GpgStatus::parse(&String::from_utf8_lossy(&output.stderr));

        if status.decryption_failed || (!output.status.success() && !status.decryption_okay) {
            let reason = if status.no_seckey.is_empty() {
                stderr_tail(&output)
            } else {
                format!("no secret key for {}", status.no_seckey.join(", "))
            };
            return Err(Error::Crypto(CryptoError::DecryptFailed(reason)));
        }

        Ok(Decrypted {
            plaintext: output.stdout,
            status: status
                .trust()
                .unwrap_or_else(|| TrustStatus::unsigned("encrypted, not signed")),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_goodsig() {
        let text = concat!(
            "[GNUPG:] NEWSIG\n",
            "gpg: Signature made Mon 01 Jan 2024\n",
            "[GNUPG:] GOODSIG 0123456789ABCDEF Alice Example <alice@example.com>\n",
            "[GNUPG:] VALIDSIG FPR0123 2024-01-01 1704067200 0 4 0 1 10 00 FPR0123\n",
        );
        let status = GpgStatus::parse(text);
        let trust = status.trust().unwrap();
        assert!(trust.verified);
        assert!(trust.good);
        assert_eq!(trust.signer, "Alice Example <alice@example.com>");
        assert_eq!(trust.detail, "FPR0123");
    }

    #[test]
    fn test_parse_badsig() {
        let status = GpgStatus::parse("[GNUPG:] BADSIG 0123456789ABCDEF Mallory <m@example.com>\n");
        let trust = status.trust().unwrap();
        assert!(trust.verified);
        assert!(!trust.good);
        assert_eq!(trust.signer, "Mallory <m@example.com>");
    }

    #[test]
    fn test_parse_errsig() {
        let status = GpgStatus::parse("[GNUPG:] ERRSIG 0123456789ABCDEF 1 10 00 1704067200 9 -\n");
        let trust = status.trust().unwrap();
        assert!(!trust.verified);
        assert!(!trust.good);
        assert!(trust.detail.contains("0123456789ABCDEF"));
    }

    #[test]
    fn test_parse_decryption() {
        let status = GpgStatus::parse(concat!(
            "[GNUPG:] NO_SECKEY 0011223344556677\n",
            "[GNUPG:] DECRYPTION_FAILED\n",
        ));
        assert!(status.decryption_failed);
        assert_eq!(status.no_seckey, vec!["0011223344556677"]);
        assert_eq!(status.trust(), None);
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert_eq!(
            GpgStatus::parse("gpg: keybox created\nrandom text\n"),
            GpgStatus::default()
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_engine_error() {
        let engine = GpgEngine::from_config(&CryptoConfig {
            gpg: "/nonexistent/gpg".into(),
            ..CryptoConfig::default()
        });
        let err = engine
            .verify_inline("-----BEGIN PGP SIGNED MESSAGE-----", &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::Engine(_))));
    }
}
