//! Reduction of a MIME tree to a single text rendering.
//!
//! The reducer walks a [`MimePart`] tree and picks the best human-readable
//! content for a plain/HTML preference. HTML goes through the injected
//! [`HtmlRenderer`]; attachments and signature parts are skipped and left
//! to the attachment collector and the trust engine.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use cmdmail_mime::encoding::strip_unprintable;
use cmdmail_mime::{Container, Leaf, MimePart};

use crate::context::Context;
use crate::display::{BLUE, BOLD, RESET, error_marker};
use crate::entity::Attachment;
use crate::error::{Error, Result};
use crate::render::HtmlRenderer;

const TEXT_PLAIN: &str = "text/plain";
const TEXT_HTML: &str = "text/html";

/// Containers reduced when nested inside another container.
const COMPOSITE_TYPES: [&str; 4] = [
    "multipart/alternative",
    "multipart/related",
    "multipart/signed",
    "multipart/mixed",
];

/// Parts consumed by the trust engine, never rendered.
pub(crate) const SIGNATURE_TYPES: [&str; 3] = [
    "application/pgp-signature",
    "application/pkcs7-signature",
    "application/x-pkcs7-signature",
];

/// Outcome of a reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Renderable content was found.
    Text(String),
    /// Nothing in the tree could be shown. The body is empty; this is not
    /// a failure.
    NoUsablePart,
}

impl Rendered {
    /// The text, or an empty string.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::NoUsablePart => String::new(),
        }
    }

    fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            Self::NoUsablePart
        } else {
            Self::Text(text)
        }
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An alternate-type result, rendered only if nothing preferred turns up.
enum Alternate<'a> {
    Ready(String),
    Pending(&'a Leaf),
}

/// Reduces MIME trees using one renderer and context.
pub struct Reducer<'a, R> {
    renderer: &'a R,
    ctx: &'a Context,
}

impl<'a, R: HtmlRenderer> Reducer<'a, R> {
    /// Creates a reducer.
    #[must_use]
    pub const fn new(renderer: &'a R, ctx: &'a Context) -> Self {
        Self { renderer, ctx }
    }

    /// Reduces `root` to its best rendering.
    ///
    /// A root leaf is rendered whatever its type. A root container is
    /// walked whatever its multipart subtype.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if a chosen leaf cannot be decoded, and
    /// interruptions of the context. Renderer failures are contained.
    pub async fn reduce(&self, root: &MimePart, prefer_html: bool) -> Result<Rendered> {
        match root {
            MimePart::Leaf(leaf) => {
                tracing::debug!(mime_type = %leaf.mime_type, size = leaf.size(), "Single part body");
                Ok(Rendered::from_text(self.render_leaf(leaf).await?))
            }
            MimePart::Container(container) => {
                tracing::debug!(mime_type = %container.mime_type, "Multipart body");
                self.reduce_container(container, prefer_html).await
            }
        }
    }

    fn reduce_container<'b>(
        &'b self,
        container: &'b Container,
        prefer_html: bool,
    ) -> BoxFuture<'b, Result<Rendered>> {
        Box::pin(async move {
            let (want, accept) = if prefer_html {
                (TEXT_HTML, TEXT_PLAIN)
            } else {
                (TEXT_PLAIN, TEXT_HTML)
            };

            let mut preferred = Vec::new();
            let mut alternates = Vec::new();
            for child in &container.children {
                if child.is_attachment() {
                    continue;
                }
                let mime_type = child.mime_type();
                match child {
                    MimePart::Leaf(leaf) if mime_type == want => {
                        let text = self.render_leaf(leaf).await?;
                        if !text.trim().is_empty() {
                            preferred.push(text);
                        }
                    }
                    MimePart::Leaf(leaf) if mime_type == accept => {
                        alternates.push(Alternate::Pending(leaf));
                    }
                    MimePart::Container(nested) if COMPOSITE_TYPES.contains(&mime_type) => {
                        // A nested rendering is acceptable under either preference.
                        if let Rendered::Text(text) =
                            self.reduce_container(nested, prefer_html).await?
                        {
                            preferred.push(text.clone());
                            alternates.push(Alternate::Ready(text));
                        }
                    }
                    _ if SIGNATURE_TYPES.contains(&mime_type) => {}
                    _ => tracing::warn!(mime_type, parent = %container.mime_type, "Unknown part type in multipart body"),
                }
            }

            if !preferred.is_empty() {
                return Ok(Rendered::Text(preferred.join("\n")));
            }

            let mut rendered = Vec::new();
            for alternate in alternates {
                let text = match alternate {
                    Alternate::Ready(text) => text,
                    Alternate::Pending(leaf) => self.render_leaf(leaf).await?,
                };
                if !text.trim().is_empty() {
                    rendered.push(text);
                }
            }
            Ok(if rendered.is_empty() {
                Rendered::NoUsablePart
            } else {
                Rendered::Text(rendered.join("\n"))
            })
        })
    }

    /// Decodes one leaf, rendering HTML.
    async fn render_leaf(&self, leaf: &Leaf) -> Result<String> {
        let text = leaf
            .decode_text()
            .map_err(|e| Error::Decode(format!("{} part: {e}", leaf.mime_type)))?;
        let text = strip_unprintable(&text);
        if leaf.mime_type != TEXT_HTML {
            return Ok(text);
        }

        match self.renderer.render_to_text(&text, self.ctx).await {
            Ok(rendered) => Ok(format!(
                "{BLUE}Rendered HTML{RESET}\n{}",
                strip_unprintable(&rendered)
            )),
            Err(Error::RenderTimeout(limit)) => {
                tracing::warn!(?limit, "HTML rendering timed out; dropping part");
                Ok(String::new())
            }
            Err(e) if e.is_interruption() => Err(e),
            Err(e) => {
                tracing::warn!(?e, "HTML rendering failed");
                Ok(error_marker(&format!("Rendering HTML: {e}")))
            }
        }
    }
}

/// Records every attachment part below `root`.
///
/// Signature parts are left out. Attachments with inline data are
/// preloaded; the rest are fetched on demand.
pub(crate) fn collect_attachments(message_id: &str, root: &MimePart) -> Vec<Arc<Attachment>> {
    let mut found = Vec::new();
    if let MimePart::Container(container) = root {
        for child in &container.children {
            collect_into(message_id, child, &mut found);
        }
    }
    found
}

fn collect_into(message_id: &str, part: &MimePart, found: &mut Vec<Arc<Attachment>>) {
    match part {
        MimePart::Leaf(leaf) => {
            if part.is_attachment() && !SIGNATURE_TYPES.contains(&leaf.mime_type.as_str()) {
                let filename = part.filename().unwrap_or_default();
                found.push(Arc::new(Attachment::from_leaf(message_id, leaf, filename)));
            }
        }
        MimePart::Container(container) => {
            for child in &container.children {
                collect_into(message_id, child, found);
            }
        }
    }
}

/// The line appended to a body for each attachment.
#[must_use]
pub fn attachment_placeholder(name: &str) -> String {
    format!("{BOLD}<<<Attachment {name:?}; inspect separately>>>{RESET}")
}

/// Appends one placeholder line per attachment.
pub(crate) fn append_placeholders(body: &mut String, attachments: &[Arc<Attachment>]) {
    for attachment in attachments {
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&attachment_placeholder(attachment.name()));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cmdmail_mime::Headers;

    use super::*;

    /// Uppercases its input and counts calls.
    #[derive(Default)]
    struct FakeRenderer {
        calls: AtomicUsize,
        fail_with: Option<fn() -> Error>,
    }

    impl HtmlRenderer for FakeRenderer {
        async fn render_to_text(&self, html: &str, _ctx: &Context) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(html.to_uppercase()),
            }
        }
    }

    fn container(mime_type: &str, children: Vec<MimePart>) -> MimePart {
        MimePart::Container(Container {
            mime_type: mime_type.into(),
            headers: Headers::new(),
            children,
        })
    }

    fn leaf(mime_type: &str, text: &str) -> MimePart {
        MimePart::Leaf(Leaf::text(mime_type, text))
    }

    fn attachment(name: &str) -> MimePart {
        let mut leaf = Leaf::text("application/pdf", "%PDF");
        leaf.headers
            .add("Content-Disposition", format!("attachment; filename=\"{name}\""));
        MimePart::Leaf(leaf)
    }

    fn alternative() -> MimePart {
        container(
            "multipart/alternative",
            vec![leaf("text/plain", "hello"), leaf("text/html", "<b>hi</b>")],
        )
    }

    #[tokio::test]
    async fn test_prefers_plain_without_rendering() {
        let renderer = FakeRenderer::default();
        let ctx = Context::new();
        let out = Reducer::new(&renderer, &ctx)
            .reduce(&alternative(), false)
            .await
            .unwrap();
        assert_eq!(out, Rendered::Text("hello".into()));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prefers_html_when_asked() {
        let renderer = FakeRenderer::default();
        let ctx = Context::new();
        let out = Reducer::new(&renderer, &ctx)
            .reduce(&alternative(), true)
            .await
            .unwrap();
        assert_eq!(
            out,
            Rendered::Text(format!("{BLUE}Rendered HTML{RESET}\n<B>HI</B>"))
        );
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_alternate() {
        let renderer = FakeRenderer::default();
        let ctx = Context::new();
        let tree = container(
            "multipart/alternative",
            vec![leaf("text/plain", " \r\n"), leaf("text/html", "<p>x</p>")],
        );
        let out = Reducer::new(&renderer, &ctx).reduce(&tree, false).await.unwrap();
        assert!(out.into_text().ends_with("<P>X</P>"));
    }

    #[tokio::test]
    async fn test_nested_counts_for_both() {
        let renderer = FakeRenderer::default();
        let ctx = Context::new();
        let tree = container(
            "multipart/mixed",
            vec![alternative(), leaf("text/plain", "footer"), attachment("x.pdf")],
        );
        let out = Reducer::new(&renderer, &ctx).reduce(&tree, false).await.unwrap();
        assert_eq!(out, Rendered::Text("hello\nfooter".into()));
        assert!(!out.clone().into_text().contains("PDF"));
    }

    #[tokio::test]
    async fn test_skips_signature_and_unknown() {
        let renderer = FakeRenderer::default();
        let ctx = Context::new();
        let tree = container(
            "multipart/signed",
            vec![
                leaf("text/plain", "signed text"),
                leaf("application/pgp-signature", "sig"),
                leaf("image/png", "png"),
            ],
        );
        let out = Reducer::new(&renderer, &ctx).reduce(&tree, false).await.unwrap();
        assert_eq!(out, Rendered::Text("signed text".into()));
    }

    #[tokio::test]
    async fn test_unrecognized_nested_container_is_skipped() {
        let renderer = FakeRenderer::default();
        let ctx = Context::new();
        let tree = container(
            "multipart/mixed",
            vec![container("multipart/report", vec![leaf("text/plain", "dsn")])],
        );
        let out = Reducer::new(&renderer, &ctx).reduce(&tree, false).await.unwrap();
        assert_eq!(out, Rendered::NoUsablePart);
    }

    #[tokio::test]
    async fn test_empty_leaf_is_no_usable_part() {
        let renderer = FakeRenderer::default();
        let ctx = Context::new();
        let out = Reducer::new(&renderer, &ctx)
            .reduce(&leaf("text/plain", "\n\n"), false)
            .await
            .unwrap();
        assert_eq!(out, Rendered::NoUsablePart);
    }

    #[tokio::test]
    async fn test_leaf_is_stripped() {
        let renderer = FakeRenderer::default();
        let ctx = Context::new();
        let out = Reducer::new(&renderer, &ctx)
            .reduce(&leaf("text/plain", "a\x1b[31mb\r\n"), false)
            .await
            .unwrap();
        assert_eq!(out, Rendered::Text("a[31mb\n".into()));
    }

    #[tokio::test]
    async fn test_render_timeout_drops_leaf() {
        let renderer = FakeRenderer {
            fail_with: Some(|| Error::RenderTimeout(std::time::Duration::from_secs(1))),
            ..FakeRenderer::default()
        };
        let ctx = Context::new();
        let out = Reducer::new(&renderer, &ctx)
            .reduce(&leaf("text/html", "<p>slow</p>"), true)
            .await
            .unwrap();
        assert_eq!(out, Rendered::NoUsablePart);
    }

    #[tokio::test]
    async fn test_render_failure_is_marked() {
        let renderer = FakeRenderer {
            fail_with: Some(|| Error::Render("exit 1".into())),
            ..FakeRenderer::default()
        };
        let ctx = Context::new();
        let out = Reducer::new(&renderer, &ctx)
            .reduce(&leaf("text/html", "<p>x</p>"), true)
            .await
            .unwrap();
        assert!(out.into_text().contains("[Rendering HTML: HTML rendering failed: exit 1]"));
    }

    #[tokio::test]
    async fn test_render_cancel_propagates() {
        let renderer = FakeRenderer {
            fail_with: Some(|| Error::Cancelled),
            ..FakeRenderer::default()
        };
        let ctx = Context::new();
        let err = Reducer::new(&renderer, &ctx)
            .reduce(&leaf("text/html", "<p>x</p>"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_decode_error_propagates() {
        let renderer = FakeRenderer::default();
        let ctx = Context::new();
        let mut bad = Leaf::text("text/plain", "x");
        bad.body = cmdmail_mime::LeafBody::Provider {
            data: Some("+/+/".into()),
            attachment_id: None,
            size: 3,
        };
        let err = Reducer::new(&renderer, &ctx)
            .reduce(&MimePart::Leaf(bad), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_collect_attachments() {
        let tree = container(
            "multipart/mixed",
            vec![
                alternative(),
                attachment("x.pdf"),
                container("multipart/mixed", vec![attachment("y.pdf")]),
            ],
        );
        let found = collect_attachments("m1", &tree);
        let names: Vec<_> = found.iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["x.pdf", "y.pdf"]);
        assert_eq!(found[0].contents(), Some(&b"%PDF"[..]));
    }

    #[test]
    fn test_placeholders() {
        let tree = container("multipart/mixed", vec![attachment("x.pdf")]);
        let found = collect_attachments("m1", &tree);
        let mut body = "text".to_string();
        append_placeholders(&mut body, &found);
        assert_eq!(body, format!("text\n{}", attachment_placeholder("x.pdf")));
        assert!(body.contains("<<<Attachment \"x.pdf\"; inspect separately>>>"));
    }
}
