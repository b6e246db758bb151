//! Draft operations.
//!
//! Each operation changes the remote draft, so the cached snapshot is
//! thrown away afterwards. Sent and deleted drafts also leave the pool.
//! The fetch gate is held throughout, so a load in flight either finishes
//! before the change or starts after the snapshot is dropped.

use std::time::Instant;

use cmdmail_mime::encoding::encode_base64url;

use super::Connection;
use crate::context::Context;
use crate::entity::{EntityKind, MailEntity};
use crate::error::{Error, Result};
use crate::level::FetchLevel;
use crate::provider::MailProvider;
use crate::render::HtmlRenderer;
use crate::trust::CryptoEngine;

fn require_draft(entity: &MailEntity) -> Result<()> {
    match entity.kind() {
        EntityKind::Draft => Ok(()),
        EntityKind::Message => Err(Error::InvalidOperation(format!(
            "{} is a message, not a draft",
            entity.id()
        ))),
    }
}

impl<P, C, R> Connection<P, C, R>
where
    P: MailProvider,
    C: CryptoEngine,
    R: HtmlRenderer,
{
    /// Replaces the draft's content with `raw`, a whole RFC 5322 message.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] for messages, provider failures and
    /// interruptions.
    pub async fn update_draft(&self, draft: &MailEntity, raw: &[u8], ctx: &Context) -> Result<()> {
        require_draft(draft)?;
        let _gate = ctx.run(draft.lock_fetch()).await?;
        let started = Instant::now();
        ctx.run(self.provider.update_draft(draft.id(), &encode_base64url(raw)))
            .await??;
        draft.invalidate();
        tracing::info!(id = draft.id(), size = raw.len(), elapsed = ?started.elapsed(), "Updated draft");
        Ok(())
    }

    /// Sends the draft. It is fully loaded first; afterwards it no longer
    /// exists as a draft.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] for messages, load and provider
    /// failures, and interruptions.
    pub async fn send_draft(&self, draft: &MailEntity, ctx: &Context) -> Result<()> {
        require_draft(draft)?;
        self.ensure_level(draft, FetchLevel::Full, ctx).await?;
        let _gate = ctx.run(draft.lock_fetch()).await?;
        let started = Instant::now();
        ctx.run(self.provider.send_draft(draft.id())).await??;
        draft.invalidate();
        self.evict_draft(draft.id());
        tracing::info!(id = draft.id(), elapsed = ?started.elapsed(), "Sent draft");
        Ok(())
    }

    /// Deletes the draft.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] for messages, provider failures and
    /// interruptions.
    pub async fn delete_draft(&self, draft: &MailEntity, ctx: &Context) -> Result<()> {
        require_draft(draft)?;
        let _gate = ctx.run(draft.lock_fetch()).await?;
        ctx.run(self.provider.delete_draft(draft.id())).await??;
        draft.invalidate();
        self.evict_draft(draft.id());
        tracing::info!(id = draft.id(), "Deleted draft");
        Ok(())
    }
}
