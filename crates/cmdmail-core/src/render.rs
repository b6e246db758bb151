//! HTML-to-text renderers.

use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::RendererConfig;
use crate::context::Context;
use crate::error::{Error, Result};

/// Turns HTML into terminal text.
pub trait HtmlRenderer: Send + Sync + 'static {
    /// Renders one HTML document.
    ///
    /// Implementations report a time limit overrun as
    /// [`Error::RenderTimeout`] and an interrupted context as
    /// [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    fn render_to_text(
        &self,
        html: &str,
        ctx: &Context,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Renders by piping HTML through an external program such as `lynx`.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    /// `program` with no arguments and a 10 second limit.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the time limit per render.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, html: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Render(format!("spawning {}: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Render("renderer stdin unavailable".to_string()))?;
        let input = html.as_bytes().to_vec();
        let write = async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        };

        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;
        if let Err(e) = written {
            tracing::debug!(?e, "Renderer closed stdin early");
        }
        if !output.status.success() {
            return Err(Error::Render(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl HtmlRenderer for CommandRenderer {
    async fn render_to_text(&self, html: &str, ctx: &Context) -> Result<String> {
        let start = Instant::now();
        let text = tokio::time::timeout(self.timeout, ctx.run(self.run(html)))
            .await
            .map_err(|_| Error::RenderTimeout(self.timeout))???;
        tracing::info!(elapsed = ?start.elapsed(), program = %self.program, "Rendered HTML");
        Ok(text)
    }
}

/// Renders in-process by converting HTML to Markdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmdRenderer;

impl HtmlRenderer for HtmdRenderer {
    async fn render_to_text(&self, html: &str, ctx: &Context) -> Result<String> {
        ctx.check()?;
        htmd::convert(html).map_err(|e| Error::Render(e.to_string()))
    }
}

/// The renderer selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredRenderer {
    /// External program.
    Command(CommandRenderer),
    /// In-process converter.
    Htmd(HtmdRenderer),
}

impl ConfiguredRenderer {
    /// Picks the program from `config`, or the in-process converter when no
    /// program is configured.
    #[must_use]
    pub fn from_config(config: &RendererConfig) -> Self {
        match &config.command {
            Some(program) => Self::Command(
                CommandRenderer::new(program)
                    .with_args(config.args.iter().cloned())
                    .with_timeout(config.timeout()),
            ),
            None => Self::Htmd(HtmdRenderer),
        }
    }
}

impl HtmlRenderer for ConfiguredRenderer {
    async fn render_to_text(&self, html: &str, ctx: &Context) -> Result<String> {
        match self {
            Self::Command(renderer) => renderer.render_to_text(html, ctx).await,
            Self::Htmd(renderer) => renderer.render_to_text(html, ctx).await,
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_renderer_pipes_stdin() {
        let renderer = CommandRenderer::new("cat");
        let text = renderer
            .render_to_text("<b>hi</b>", &Context::new())
            .await
            .unwrap();
        assert_eq!(text, "<b>hi</b>");
    }

    #[tokio::test]
    async fn test_command_renderer_timeout() {
        let renderer = CommandRenderer::new("sleep")
            .with_args(["5"])
            .with_timeout(Duration::from_millis(50));
        let err = renderer
            .render_to_text("", &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RenderTimeout(_)));
    }

    #[tokio::test]
    async fn test_command_renderer_cancelled() {
        let ctx = Context::new();
        ctx.cancel();
        let err = CommandRenderer::new("cat")
            .render_to_text("x", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_command_renderer_missing_program() {
        let err = CommandRenderer::new("/nonexistent/renderer")
            .render_to_text("x", &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[tokio::test]
    async fn test_htmd_renderer() {
        let text = HtmdRenderer
            .render_to_text("<p>Hello <strong>world</strong></p>", &Context::new())
            .await
            .unwrap();
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
    }

    #[test]
    fn test_from_config() {
        let renderer = ConfiguredRenderer::from_config(&RendererConfig::default());
        assert!(matches!(renderer, ConfiguredRenderer::Command(_)));

        let config = RendererConfig {
            command: None,
            ..RendererConfig::default()
        };
        assert!(matches!(
            ConfiguredRenderer::from_config(&config),
            ConfiguredRenderer::Htmd(_)
        ));
    }
}
