//! Label resolution for a connection.

use std::sync::Arc;
use std::time::Instant;

use super::{Connection, lock, pooled};
use crate::context::Context;
use crate::display::NORMAL;
use crate::entity::MailEntity;
use crate::error::Result;
use crate::labels::{Label, UNREAD};
use crate::level::FetchLevel;
use crate::provider::MailProvider;
use crate::render::HtmlRenderer;
use crate::trust::CryptoEngine;

impl<P, C, R> Connection<P, C, R>
where
    P: MailProvider,
    C: CryptoEngine,
    R: HtmlRenderer,
{
    /// The shared label with this ID, loaded or not. Nothing is fetched.
    #[must_use]
    pub fn label_handle(&self, id: &str) -> Arc<Label> {
        pooled(&self.labels, id, || Label::new(id))
    }

    /// Number of pooled labels.
    #[must_use]
    pub fn label_count(&self) -> usize {
        lock(&self.labels).len()
    }

    /// The label with this ID, fetching its metadata once.
    ///
    /// # Errors
    ///
    /// Provider failures and interruptions. The label stays unloaded and a
    /// later call tries again.
    pub async fn label(&self, id: &str, ctx: &Context) -> Result<Arc<Label>> {
        let label = self.label_handle(id);
        if label.is_loaded() {
            return Ok(label);
        }

        let _gate = ctx.run(label.lock_fetch()).await?;
        if label.is_loaded() {
            return Ok(Arc::clone(&label));
        }
        tracing::info!(id, "Late loading of label");
        let info = ctx.run(self.provider.get_label(id)).await??;
        label.set_info(info);
        Ok(Arc::clone(&label))
    }

    /// Loads metadata for every label the provider knows.
    ///
    /// Returns the number of labels loaded.
    ///
    /// # Errors
    ///
    /// Provider failures and interruptions.
    pub async fn preload_labels(&self, ctx: &Context) -> Result<usize> {
        let started = Instant::now();
        let infos = ctx.run(self.provider.list_labels()).await??;
        let count = infos.len();
        for info in infos {
            self.label_handle(&info.id).set_info(info);
        }
        tracing::info!(count, elapsed = ?started.elapsed(), "Preloaded labels");
        Ok(count)
    }

    /// The entity's labels, without `UNREAD`, in the entity's order.
    ///
    /// A label whose metadata cannot be fetched is logged and returned
    /// unloaded, showing as `<unknown>`.
    ///
    /// # Errors
    ///
    /// Failures fetching the entity itself, and interruptions.
    pub async fn labels_of(&self, entity: &MailEntity, ctx: &Context) -> Result<Vec<Arc<Label>>> {
        let snapshot = self.ensure_level(entity, FetchLevel::Minimal, ctx).await?;
        let mut labels = Vec::with_capacity(snapshot.label_ids.len());
        for id in snapshot.label_ids.iter().filter(|id| *id != UNREAD) {
            match self.label(id, ctx).await {
                Ok(label) => labels.push(label),
                Err(e) if e.is_interruption() => return Err(e),
                Err(e) => {
                    tracing::error!(?e, id = %id, "Failed to fetch label");
                    labels.push(self.label_handle(id));
                }
            }
        }
        Ok(labels)
    }

    /// Colored first letters and colored names of the entity's colored
    /// labels, leaving out `exclude`.
    ///
    /// # Errors
    ///
    /// See [`Self::labels_of`].
    pub async fn label_colors(
        &self,
        entity: &MailEntity,
        exclude: &[&str],
        ctx: &Context,
    ) -> Result<(String, String)> {
        let mut chars = String::new();
        let mut names = Vec::new();
        for label in self.labels_of(entity, ctx).await? {
            if exclude.iter().any(|id| *id == label.id()) {
                continue;
            }
            if let Some(c) = label.color_char() {
                chars.push_str(&c);
                names.push(label.label_string());
            }
        }
        if !chars.is_empty() {
            chars.push_str(NORMAL);
        }
        Ok((chars, names.join(" ")))
    }

    /// All of the entity's labels in their colors, comma separated.
    ///
    /// # Errors
    ///
    /// See [`Self::labels_of`].
    pub async fn labels_string(&self, entity: &MailEntity, ctx: &Context) -> Result<String> {
        let labels = self.labels_of(entity, ctx).await?;
        Ok(labels
            .iter()
            .map(|l| l.label_string())
            .collect::<Vec<_>>()
            .join(", "))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::{Error, ProviderError};
    use crate::labels::{INBOX, UNKNOWN_NAME, color_code};
    use crate::provider::{LabelColor, LabelInfo, MemoryProvider, ProviderMessage};
    use crate::render::HtmdRenderer;
    use crate::trust::GpgEngine;

    fn connection() -> Connection<MemoryProvider, GpgEngine, HtmdRenderer> {
        let provider = MemoryProvider::new();
        provider.insert_message(ProviderMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            label_ids: vec![INBOX.into(), UNREAD.into(), "Label_7".into()],
            ..ProviderMessage::default()
        });
        provider.insert_label(LabelInfo {
            id: INBOX.into(),
            name: "INBOX".into(),
            color: None,
        });
        provider.insert_label(LabelInfo {
            id: "Label_7".into(),
            name: "work".into(),
            color: Some(LabelColor {
                text_color: "#ffffff".into(),
                background_color: "#fb4c2f".into(),
            }),
        });
        Connection::new(provider, GpgEngine::default(), HtmdRenderer)
    }

    #[tokio::test]
    async fn test_label_loaded_once() {
        let conn = connection();
        let ctx = Context::new();
        let first = conn.label("Label_7", &ctx).await.unwrap();
        let second = conn.label("Label_7", &ctx).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "work");
        assert_eq!(conn.provider().calls().get_label, 1);
    }

    #[tokio::test]
    async fn test_preload_labels() {
        let conn = connection();
        let ctx = Context::new();
        assert_eq!(conn.preload_labels(&ctx).await.unwrap(), 2);
        assert_eq!(conn.label_count(), 2);
        conn.label(INBOX, &ctx).await.unwrap();
        assert_eq!(conn.provider().calls().get_label, 0);
    }

    #[tokio::test]
    async fn test_labels_of_skips_unread() {
        let conn = connection();
        let message = conn.message("m1");
        let labels = conn.labels_of(&message, &Context::new()).await.unwrap();
        let ids: Vec<_> = labels.iter().map(|l| l.id().to_string()).collect();
        assert_eq!(ids, vec![INBOX, "Label_7"]);
        assert_eq!(message.level(), FetchLevel::Minimal);
    }

    #[tokio::test]
    async fn test_unknown_label_is_kept() {
        let conn = connection();
        conn.provider().insert_message(ProviderMessage {
            id: "m2".into(),
            label_ids: vec!["Label_gone".into()],
            ..ProviderMessage::default()
        });
        let message = conn.message("m2");
        let labels = conn.labels_of(&message, &Context::new()).await.unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].name(), UNKNOWN_NAME);
        assert!(!labels[0].is_loaded());
    }

    #[tokio::test]
    async fn test_label_fetch_failure_retries() {
        let conn = connection();
        let ctx = Context::new();
        conn.provider()
            .fail_next(ProviderError::Transport("reset".into()));
        let err = conn.label("Label_7", &ctx).await.unwrap_err();
        assert!(matches!(err, Error::RemoteFetch(_)));
        assert!(conn.label("Label_7", &ctx).await.unwrap().is_loaded());
    }

    #[tokio::test]
    async fn test_label_colors() {
        let conn = connection();
        let message = conn.message("m1");
        let ctx = Context::new();

        let (chars, names) = conn.label_colors(&message, &[], &ctx).await.unwrap();
        let inbox = color_code("#000000", "#ffffff");
        let work = color_code("#ffffff", "#fb4c2f");
        assert_eq!(chars, format!("{inbox}I{work}w{NORMAL}"));
        assert_eq!(
            names,
            format!("{inbox}INBOX{NORMAL} {work}work{NORMAL}")
        );

        let (chars, _) = conn.label_colors(&message, &[INBOX], &ctx).await.unwrap();
        assert_eq!(chars, format!("{work}w{NORMAL}"));
    }

    #[tokio::test]
    async fn test_labels_string() {
        let conn = connection();
        let message = conn.message("m1");
        let text = conn.labels_string(&message, &Context::new()).await.unwrap();
        assert!(text.contains("INBOX"));
        assert!(text.contains(", "));
        assert!(text.ends_with(&format!("work{NORMAL}")));
    }
}
