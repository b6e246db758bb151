//! Configuration for the external collaborators.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// HTML renderer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Program that reads HTML on stdin and writes text on stdout.
    /// `None` selects the in-process converter.
    pub command: Option<String>,
    /// Arguments passed to `command`.
    pub args: Vec<String>,
    /// Per-render time limit in seconds.
    pub timeout_secs: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            command: Some("lynx".to_string()),
            args: vec!["-dump".to_string(), "-stdin".to_string()],
            timeout_secs: 10,
        }
    }
}

impl RendererConfig {
    /// Per-render time limit.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// External crypto engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// `gpg` binary.
    pub gpg: String,
    /// `openssl` binary, used for S/MIME.
    pub openssl: String,
    /// Per-invocation time limit in seconds.
    pub timeout_secs: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            gpg: "gpg".to_string(),
            openssl: "openssl".to_string(),
            timeout_secs: 30,
        }
    }
}

impl CryptoConfig {
    /// Per-invocation time limit.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-level core configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// HTML renderer.
    pub renderer: RendererConfig,
    /// Crypto engine.
    pub crypto: CryptoConfig,
    /// Deadline applied to top-level operations, in seconds.
    pub fetch_timeout_secs: Option<u64>,
}

impl CoreConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Parses a JSON configuration. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, or [`Error::Config`] if
    /// a value is unusable.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks for settings the collaborators cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first bad setting.
    pub fn validate(&self) -> Result<()> {
        if self.renderer.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(Error::Config(
                "renderer.command is empty; use null for the built-in converter".to_string(),
            ));
        }
        if self.renderer.timeout_secs == 0 {
            return Err(Error::Config("renderer.timeout_secs must be positive".to_string()));
        }
        for (key, program) in [
            ("crypto.gpg", &self.crypto.gpg),
            ("crypto.openssl", &self.crypto.openssl),
        ] {
            if program.trim().is_empty() {
                return Err(Error::Config(format!("{key} is empty")));
            }
        }
        if self.crypto.timeout_secs == 0 {
            return Err(Error::Config("crypto.timeout_secs must be positive".to_string()));
        }
        if self.fetch_timeout_secs == Some(0) {
            return Err(Error::Config("fetch_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Loads a JSON configuration file, returning defaults if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => {
                tracing::debug!(path = %path.display(), "Loaded configuration");
                Self::from_json(&json)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deadline for top-level operations, if configured.
    #[must_use]
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Clone, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// Sets the renderer program, or `None` for the in-process converter.
    #[must_use]
    pub fn renderer_command(mut self, command: Option<String>) -> Self {
        self.config.renderer.command = command;
        self
    }

    /// Sets the renderer arguments.
    #[must_use]
    pub fn renderer_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.renderer.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the per-render time limit.
    #[must_use]
    pub const fn renderer_timeout(mut self, timeout: Duration) -> Self {
        self.config.renderer.timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the `gpg` binary.
    #[must_use]
    pub fn gpg(mut self, gpg: impl Into<String>) -> Self {
        self.config.crypto.gpg = gpg.into();
        self
    }

    /// Sets the `openssl` binary.
    #[must_use]
    pub fn openssl(mut self, openssl: impl Into<String>) -> Self {
        self.config.crypto.openssl = openssl.into();
        self
    }

    /// Sets the per-invocation crypto time limit.
    #[must_use]
    pub const fn crypto_timeout(mut self, timeout: Duration) -> Self {
        self.config.crypto.timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the deadline for top-level operations.
    #[must_use]
    pub const fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> CoreConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.renderer.command.as_deref(), Some("lynx"));
        assert_eq!(config.renderer.args, vec!["-dump", "-stdin"]);
        assert_eq!(config.renderer.timeout(), Duration::from_secs(10));
        assert_eq!(config.crypto.gpg, "gpg");
        assert_eq!(config.crypto.timeout(), Duration::from_secs(30));
        assert_eq!(config.fetch_timeout(), None);
    }

    #[test]
    fn test_partial_json() {
        let config =
            CoreConfig::from_json(r#"{"renderer": {"command": null}, "fetch_timeout_secs": 5}"#)
                .unwrap();
        assert_eq!(config.renderer.command, None);
        assert_eq!(config.renderer.timeout_secs, 10);
        assert_eq!(config.fetch_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_builder() {
        let config = CoreConfig::builder()
            .renderer_command(Some("w3m".to_string()))
            .renderer_args(["-dump", "-T", "text/html"])
            .gpg("gpg2")
            .crypto_timeout(Duration::from_secs(3))
            .fetch_timeout(Duration::from_secs(20))
            .build();
        assert_eq!(config.renderer.command.as_deref(), Some("w3m"));
        assert_eq!(config.renderer.args.len(), 3);
        assert_eq!(config.crypto.gpg, "gpg2");
        assert_eq!(config.crypto.timeout_secs, 3);
        assert_eq!(config.fetch_timeout_secs, Some(20));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"crypto": {"gpg": "/usr/bin/gpg"}}"#).unwrap();
        let config = CoreConfig::load(&path).unwrap();
        assert_eq!(config.crypto.gpg, "/usr/bin/gpg");
        assert_eq!(config.crypto.openssl, "openssl");
    }

    #[test]
    fn test_unusable_values() {
        for json in [
            r#"{"renderer": {"command": ""}}"#,
            r#"{"renderer": {"timeout_secs": 0}}"#,
            r#"{"crypto": {"gpg": " "}}"#,
            r#"{"fetch_timeout_secs": 0}"#,
        ] {
            let err = CoreConfig::from_json(json).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{json}: {err}");
        }
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_rejects_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"crypto": {"timeout_secs": 0}}"#).unwrap();
        let err = CoreConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("crypto.timeout_secs")));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(CoreConfig::load(&path).unwrap_err(), Error::Serde(_)));
    }
}
