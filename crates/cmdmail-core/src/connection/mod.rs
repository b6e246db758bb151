//! The connection: entity pools and the level cache.
//!
//! A [`Connection`] owns the provider, crypto engine and HTML renderer it
//! was built with, plus identity maps for messages, drafts and labels. One
//! ID always maps to one shared instance.
//!
//! ## Loading
//!
//! [`Connection::ensure_level`] is the only way entity data gets fetched.
//! It takes the entity's fetch gate, so concurrent callers wanting an
//! unsatisfied level wait for the first caller's fetch and then see its
//! snapshot instead of fetching again. The snapshot is swapped in only
//! after the whole load (including body rendering and trust checks)
//! succeeds; a failed or interrupted load leaves the old one in place.
//!
//! ## Example
//!
//! ```ignore
//! use cmdmail_core::{Connection, Context, FetchLevel, GpgEngine, HtmdRenderer};
//!
//! let conn = Connection::new(provider, GpgEngine::default(), HtmdRenderer);
//! let ctx = Context::new();
//! let message = conn.message("18c2f0a9d1e4b7a3");
//!
//! println!("{}", conn.header(&message, "Subject", &ctx).await?);
//! println!("{}", conn.body(&message, &ctx).await?);
//! ```

mod drafts;
mod headers;
mod labels;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use cmdmail_mime::encoding::decode_base64url;

pub use headers::format_list_time;

use crate::context::Context;
use crate::display::error_marker;
use crate::entity::{Attachment, EntityKind, MailEntity, Snapshot};
use crate::error::{CryptoError, Error, Result};
use crate::labels::Label;
use crate::level::FetchLevel;
use crate::materialize::{Reducer, Rendered, append_placeholders, collect_attachments};
use crate::provider::{MailProvider, MessageFormat, Payload, ProviderMessage};
use crate::render::HtmlRenderer;
use crate::trust::{CryptoEngine, Source, TrustEngine, TrustStatus, fetch_raw};

type Pool<T> = Mutex<HashMap<String, Arc<T>>>;

/// Entry point for reading mail.
///
/// Collaborators are injected at construction; the connection holds no
/// global state.
#[derive(Debug)]
pub struct Connection<P, C, R> {
    provider: P,
    crypto: C,
    renderer: R,
    messages: Pool<MailEntity>,
    drafts: Pool<MailEntity>,
    labels: Pool<Label>,
}

fn lock<T>(pool: &Pool<T>) -> MutexGuard<'_, HashMap<String, Arc<T>>> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

fn pooled<T>(pool: &Pool<T>, id: &str, make: impl FnOnce() -> T) -> Arc<T> {
    Arc::clone(
        lock(pool)
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(make())),
    )
}

impl<P, C, R> Connection<P, C, R>
where
    P: MailProvider,
    C: CryptoEngine,
    R: HtmlRenderer,
{
    /// Creates a connection with empty pools.
    #[must_use]
    pub fn new(provider: P, crypto: C, renderer: R) -> Self {
        Self {
            provider,
            crypto,
            renderer,
            messages: Mutex::new(HashMap::new()),
            drafts: Mutex::new(HashMap::new()),
            labels: Mutex::new(HashMap::new()),
        }
    }

    /// The provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// The message with this ID. Nothing is fetched.
    #[must_use]
    pub fn message(&self, id: &str) -> Arc<MailEntity> {
        pooled(&self.messages, id, || MailEntity::new(id, EntityKind::Message))
    }

    /// The draft with this ID. Nothing is fetched.
    #[must_use]
    pub fn draft(&self, id: &str) -> Arc<MailEntity> {
        pooled(&self.drafts, id, || MailEntity::new(id, EntityKind::Draft))
    }

    /// Number of pooled messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        lock(&self.messages).len()
    }

    fn evict_draft(&self, id: &str) {
        lock(&self.drafts).remove(id);
    }

    /// Makes sure the entity holds at least `level`, fetching if needed.
    ///
    /// Returns the snapshot that satisfied the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteFetch`] if the provider call fails,
    /// [`Error::Decode`] for a response without the expected payload, and
    /// [`Error::Cancelled`] or [`Error::DeadlineExceeded`] if `ctx` ends
    /// first. The entity keeps its previous snapshot in all cases.
    pub async fn ensure_level(
        &self,
        entity: &MailEntity,
        level: FetchLevel,
        ctx: &Context,
    ) -> Result<Arc<Snapshot>> {
        let current = entity.snapshot();
        if current.level.satisfies(level) {
            return Ok(current);
        }

        let _gate = ctx.run(entity.lock_fetch()).await?;
        let current = entity.snapshot();
        if current.level.satisfies(level) {
            tracing::debug!(id = entity.id(), %level, "Level reached while waiting");
            return Ok(current);
        }

        let next = self.load(entity, &current, level, ctx).await?;
        Ok(entity.replace(next))
    }

    /// Refetches at the entity's current level (at least Minimal),
    /// ignoring the cache. The cached raw source is dropped.
    ///
    /// # Errors
    ///
    /// See [`Self::ensure_level`].
    pub async fn reload(&self, entity: &MailEntity, ctx: &Context) -> Result<Arc<Snapshot>> {
        let _gate = ctx.run(entity.lock_fetch()).await?;
        let current = entity.snapshot();
        let level = current.level.max(FetchLevel::Minimal);
        let next = self.load(entity, &Snapshot::default(), level, ctx).await?;
        Ok(entity.replace(next))
    }

    /// Adds and removes labels remotely and records the resulting label
    /// set. The fetch level and everything else are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] for drafts, and provider
    /// failures and interruptions.
    pub async fn apply_label_delta(
        &self,
        entity: &MailEntity,
        add: &[String],
        remove: &[String],
        ctx: &Context,
    ) -> Result<Vec<String>> {
        if entity.kind() == EntityKind::Draft {
            return Err(Error::InvalidOperation(
                "labels of a draft cannot be modified".to_string(),
            ));
        }

        let _gate = ctx.run(entity.lock_fetch()).await?;
        let started = Instant::now();
        let labels = ctx
            .run(self.provider.modify_labels(entity.id(), add, remove))
            .await??;
        tracing::info!(
            id = entity.id(),
            ?add,
            ?remove,
            now = ?labels,
            elapsed = ?started.elapsed(),
            "Modified labels"
        );

        entity.update(|s| s.label_ids.clone_from(&labels));
        Ok(labels)
    }

    /// Refetches only the label set. An entity that had nothing is
    /// promoted to Minimal.
    ///
    /// # Errors
    ///
    /// Provider failures and interruptions.
    pub async fn reload_labels(&self, entity: &MailEntity, ctx: &Context) -> Result<()> {
        let _gate = ctx.run(entity.lock_fetch()).await?;
        let fresh = self.fetch(entity, MessageFormat::Minimal, ctx).await?;
        entity.update(|s| {
            if s.level == FetchLevel::Empty {
                s.level = FetchLevel::Minimal;
                s.thread_id.clone_from(&fresh.thread_id);
            }
            s.label_ids = fresh.label_ids;
        });
        Ok(())
    }

    /// The decoded raw RFC 5322 source, fetched once and cached.
    ///
    /// # Errors
    ///
    /// Provider failures, interruptions, and [`Error::Decode`] if the
    /// provider returns no usable raw data.
    pub async fn raw(&self, entity: &MailEntity, ctx: &Context) -> Result<Arc<Vec<u8>>> {
        if let Some(raw) = &entity.snapshot().raw {
            return Ok(Arc::clone(raw));
        }

        let _gate = ctx.run(entity.lock_fetch()).await?;
        if let Some(raw) = &entity.snapshot().raw {
            return Ok(Arc::clone(raw));
        }
        let raw = Arc::new(fetch_raw(&self.provider, entity.kind(), entity.id(), ctx).await?);
        entity.update(|s| s.raw = Some(Arc::clone(&raw)));
        Ok(raw)
    }

    /// Attachment data, fetched at most once and then kept.
    ///
    /// # Errors
    ///
    /// Provider failures, interruptions, and [`Error::Decode`] for bad
    /// data or an attachment without a provider handle.
    pub async fn download<'a>(&self, attachment: &'a Attachment, ctx: &Context) -> Result<&'a [u8]> {
        let data = attachment
            .cell()
            .get_or_try_init(|| async {
                let attachment_id = attachment.attachment_id().ok_or_else(|| {
                    Error::Decode(format!("attachment {:?} has no data", attachment.name()))
                })?;
                let started = Instant::now();
                let data = ctx
                    .run(
                        self.provider
                            .get_attachment(attachment.message_id(), attachment_id),
                    )
                    .await??;
                let data = decode_base64url(&data)?;
                tracing::info!(
                    message_id = attachment.message_id(),
                    attachment_id,
                    size = data.len(),
                    elapsed = ?started.elapsed(),
                    "Downloaded attachment"
                );
                Ok::<_, Error>(data)
            })
            .await?;
        Ok(data.as_slice())
    }

    async fn fetch(
        &self,
        entity: &MailEntity,
        format: MessageFormat,
        ctx: &Context,
    ) -> Result<ProviderMessage> {
        let started = Instant::now();
        let message = match entity.kind() {
            EntityKind::Message => {
                ctx.run(self.provider.get_message(entity.id(), format))
                    .await??
            }
            EntityKind::Draft => {
                ctx.run(self.provider.get_draft(entity.id(), format))
                    .await??
                    .message
            }
        };
        tracing::debug!(
            id = entity.id(),
            kind = ?entity.kind(),
            ?format,
            elapsed = ?started.elapsed(),
            "Fetched entity"
        );
        Ok(message)
    }

    /// Builds the next snapshot at `level`. Publishes nothing.
    async fn load(
        &self,
        entity: &MailEntity,
        current: &Snapshot,
        level: FetchLevel,
        ctx: &Context,
    ) -> Result<Snapshot> {
        let started = Instant::now();
        let level = level.max(FetchLevel::Minimal);
        let message = self.fetch(entity, MessageFormat::from(level), ctx).await?;

        let mut next = Snapshot {
            level,
            thread_id: message.thread_id,
            label_ids: message.label_ids,
            raw: current.raw.clone(),
            ..Snapshot::default()
        };

        if level.satisfies(FetchLevel::Metadata) {
            let payload = message.payload.ok_or_else(|| {
                Error::Decode(format!("{} {} has no payload", entity.id(), level))
            })?;
            next.headers = payload
                .headers
                .iter()
                .map(|h| (h.name.to_ascii_lowercase(), h.value.clone()))
                .collect();

            if level == FetchLevel::Full {
                let message_id = if message.id.is_empty() {
                    entity.id()
                } else {
                    message.id.as_str()
                };
                let source = Source {
                    kind: entity.kind(),
                    entity_id: entity.id(),
                    message_id,
                };
                self.materialize(source, &payload, &mut next, ctx).await?;
            }
        }

        tracing::info!(
            id = entity.id(),
            %level,
            elapsed = ?started.elapsed(),
            "Loaded entity"
        );
        Ok(next)
    }

    /// Renders the body, runs the trust checks and records attachments.
    ///
    /// Only aborting errors (provider failures and interruptions) are
    /// returned; everything else ends up inline or in the diagnostics.
    async fn materialize(
        &self,
        source: Source<'_>,
        payload: &Payload,
        next: &mut Snapshot,
        ctx: &Context,
    ) -> Result<()> {
        let tree = payload.to_mime();
        let reducer = Reducer::new(&self.renderer, ctx);
        next.body_html = contained(reducer.reduce(&tree, true).await, "HTML body")?;
        next.body = contained(reducer.reduce(&tree, false).await, "body")?;

        let trust = TrustEngine::new(&self.provider, &self.crypto, &self.renderer, source, ctx);

        let mut attachments = None;
        match trust.decrypt(&tree).await {
            Ok(Some(decryption)) => {
                next.body = decryption.body;
                next.body_html = decryption.body_html;
                next.trust = Some(decryption.status);
                attachments = Some(decryption.attachments);
            }
            Ok(None) => {}
            Err(e) if e.aborts_load() => return Err(e),
            Err(e) => {
                tracing::error!(?e, id = source.entity_id, "Decrypting message");
                next.body = error_marker(&format!("Decrypting: {e}"));
                next.body_html.clone_from(&next.body);
                next.trust = Some(TrustStatus::unsigned(e.to_string()));
                next.diagnostics.push(CryptoError::from_contained(&e));
                attachments = Some(Vec::new());
            }
        }

        match trust.verify_signed(&tree, &mut next.raw).await {
            Ok(Some(status)) => next.trust = Some(status),
            Ok(None) => {}
            Err(e) if e.aborts_load() => return Err(e),
            Err(e) => {
                tracing::error!(?e, id = source.entity_id, "Checking signature");
                next.trust = Some(TrustStatus::unsigned(e.to_string()));
                next.diagnostics.push(CryptoError::from_contained(&e));
            }
        }

        next.original_body.clone_from(&next.body);
        let scan = trust.annotate_inline(&next.body).await?;
        next.body = scan.body;
        next.diagnostics.extend(scan.failures);

        next.attachments =
            attachments.unwrap_or_else(|| collect_attachments(source.message_id, &tree));
        append_placeholders(&mut next.body, &next.attachments);
        append_placeholders(&mut next.body_html, &next.attachments);
        Ok(())
    }
}

/// Turns a failed reduction into an inline marker unless it must abort.
fn contained(rendered: Result<Rendered>, what: &str) -> Result<String> {
    match rendered {
        Ok(rendered) => Ok(rendered.into_text()),
        Err(e) if e.aborts_load() => Err(e),
        Err(e) => {
            tracing::warn!(?e, what, "Rendering failed");
            Ok(error_marker(&format!("Rendering {what}: {e}")))
        }
    }
}
