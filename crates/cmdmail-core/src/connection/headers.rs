//! Header and body reads.
//!
//! Every read first makes sure the entity holds the level it needs.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeDelta};
use cmdmail_mime::encoding::strip_unprintable;
use cmdmail_mime::{Mailbox, split_list};

use super::Connection;
use crate::context::Context;
use crate::entity::{Attachment, MailEntity};
use crate::error::{CryptoError, Error, Result};
use crate::level::FetchLevel;
use crate::provider::MailProvider;
use crate::render::HtmlRenderer;
use crate::trust::{CryptoEngine, TrustStatus};

/// Date layouts seen in the wild besides RFC 2822, with an explicit
/// offset.
const ZONED_LAYOUTS: [&str; 4] = [
    "%a, %e %b %y %H:%M:%S %z",
    "%e %b %y %H:%M:%S %z",
    "%a, %e %b %Y %H:%M:%S %z",
    "%e %b %Y %H:%M:%S %z",
];

/// Layouts without a usable offset; read as UTC.
const NAIVE_LAYOUTS: [&str; 4] = [
    "%a, %e %b %y %H:%M:%S",
    "%e %b %y %H:%M:%S",
    "%a, %e %b %Y %H:%M:%S",
    "%e %b %Y %H:%M:%S",
];

/// Parses a `Date` header.
///
/// Trailing comments like `(PDT)` or `(GMT-07:00)` are ignored, as is a
/// zone abbreviation that follows the time.
fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    let value = match value.rfind('(') {
        Some(i) if value.ends_with(')') => value[..i].trim_end(),
        _ => value,
    };
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date);
    }
    if let Some(date) = ZONED_LAYOUTS
        .iter()
        .find_map(|layout| DateTime::parse_from_str(value, layout).ok())
    {
        return Some(date);
    }

    // "... 15:04:05 CEST": drop the abbreviation.
    let naive = match value.rsplit_once(' ') {
        Some((head, zone)) if zone.chars().all(|c| c.is_ascii_alphabetic()) => head,
        _ => value,
    };
    NAIVE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(naive, layout).ok())
        .map(|t| t.and_utc().fixed_offset())
}

/// Short list-view form of a timestamp: the year if older than a year,
/// `Mon DD` if not today, else `HH:MM`.
#[must_use]
pub fn format_list_time(time: DateTime<Local>, now: DateTime<Local>) -> String {
    if now.signed_duration_since(time) > TimeDelta::days(365) {
        time.format("%Y").to_string()
    } else if time.date_naive() != now.date_naive() {
        time.format("%b %d").to_string()
    } else {
        time.format("%H:%M").to_string()
    }
}

/// Recipients from `lists`, dropping `target` and repeats (by address,
/// ignoring case). Unparseable entries are kept as they are.
fn filter_recipients(target: &str, lists: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = split_list(target)
        .iter()
        .filter_map(|entry| Mailbox::parse(entry).ok())
        .map(|m| m.address.to_ascii_lowercase())
        .collect();

    let mut out = Vec::new();
    for entry in lists.iter().flat_map(|list| split_list(list)) {
        match Mailbox::parse(&entry) {
            Ok(mailbox) => {
                if seen.insert(mailbox.address.to_ascii_lowercase()) {
                    out.push(entry);
                }
            }
            Err(e) => {
                tracing::warn!(?e, entry = %entry, "Unparseable recipient");
                out.push(entry);
            }
        }
    }
    out
}

impl<P, C, R> Connection<P, C, R>
where
    P: MailProvider,
    C: CryptoEngine,
    R: HtmlRenderer,
{
    /// Thread the entity belongs to.
    ///
    /// # Errors
    ///
    /// Load failures; see [`Self::ensure_level`].
    pub async fn thread_id(&self, entity: &MailEntity, ctx: &Context) -> Result<String> {
        let snapshot = self.ensure_level(entity, FetchLevel::Minimal, ctx).await?;
        Ok(snapshot.thread_id.clone())
    }

    /// A top-level header, case-insensitively, safe for the terminal.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the header is absent, and load failures.
    pub async fn header(&self, entity: &MailEntity, key: &str, ctx: &Context) -> Result<String> {
        let snapshot = self.ensure_level(entity, FetchLevel::Metadata, ctx).await?;
        snapshot
            .headers
            .get(&key.to_ascii_lowercase())
            .map(|v| strip_unprintable(v))
            .ok_or_else(|| Error::NotFound(format!("header {key:?} in {}", entity.id())))
    }

    /// A header, or `None` if absent.
    async fn optional_header(
        &self,
        entity: &MailEntity,
        key: &str,
        ctx: &Context,
    ) -> Result<Option<String>> {
        match self.header(entity, key, ctx).await {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The plain-preferring body, annotated and with attachment
    /// placeholders.
    ///
    /// # Errors
    ///
    /// Load failures; see [`Self::ensure_level`].
    pub async fn body(&self, entity: &MailEntity, ctx: &Context) -> Result<String> {
        let snapshot = self.ensure_level(entity, FetchLevel::Full, ctx).await?;
        Ok(snapshot.body.clone())
    }

    /// The HTML-preferring body.
    ///
    /// # Errors
    ///
    /// Load failures; see [`Self::ensure_level`].
    pub async fn body_html(&self, entity: &MailEntity, ctx: &Context) -> Result<String> {
        let snapshot = self.ensure_level(entity, FetchLevel::Full, ctx).await?;
        Ok(snapshot.body_html.clone())
    }

    /// The body before inline signature annotation and attachment
    /// placeholders, for quoting in replies.
    ///
    /// # Errors
    ///
    /// Load failures; see [`Self::ensure_level`].
    pub async fn unpatched_body(&self, entity: &MailEntity, ctx: &Context) -> Result<String> {
        let snapshot = self.ensure_level(entity, FetchLevel::Full, ctx).await?;
        Ok(snapshot.original_body.clone())
    }

    /// Attachments found in the body.
    ///
    /// # Errors
    ///
    /// Load failures; see [`Self::ensure_level`].
    pub async fn attachments(
        &self,
        entity: &MailEntity,
        ctx: &Context,
    ) -> Result<Vec<Arc<Attachment>>> {
        let snapshot = self.ensure_level(entity, FetchLevel::Full, ctx).await?;
        Ok(snapshot.attachments.clone())
    }

    /// Envelope trust status; `None` if the message is neither signed nor
    /// encrypted.
    ///
    /// # Errors
    ///
    /// Load failures; see [`Self::ensure_level`].
    pub async fn trust_status(
        &self,
        entity: &MailEntity,
        ctx: &Context,
    ) -> Result<Option<TrustStatus>> {
        let snapshot = self.ensure_level(entity, FetchLevel::Full, ctx).await?;
        Ok(snapshot.trust.clone())
    }

    /// Crypto failures contained during the last full load.
    ///
    /// # Errors
    ///
    /// Load failures; see [`Self::ensure_level`].
    pub async fn trust_diagnostics(
        &self,
        entity: &MailEntity,
        ctx: &Context,
    ) -> Result<Vec<CryptoError>> {
        let snapshot = self.ensure_level(entity, FetchLevel::Full, ctx).await?;
        Ok(snapshot.diagnostics.clone())
    }

    /// Where replies go: `Reply-To`, else `From`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if neither header is present, and load
    /// failures.
    pub async fn reply_to(&self, entity: &MailEntity, ctx: &Context) -> Result<String> {
        match self.optional_header(entity, "Reply-To", ctx).await? {
            Some(reply_to) => Ok(reply_to),
            None => self.header(entity, "From", ctx).await,
        }
    }

    /// Reply target and the comma separated recipients to copy when
    /// replying to all: `From` (if not the target), `Cc` and `To`, with
    /// the target and repeated addresses removed.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if there is no `From`, and load failures.
    pub async fn reply_to_all(
        &self,
        entity: &MailEntity,
        ctx: &Context,
    ) -> Result<(String, String)> {
        let target = self.reply_to(entity, ctx).await?;
        let from = self.header(entity, "From", ctx).await?;

        let mut lists = Vec::new();
        if from != target {
            lists.push(from);
        }
        for key in ["Cc", "To"] {
            if let Some(list) = self.optional_header(entity, key, ctx).await? {
                lists.push(list);
            }
        }
        let cc = filter_recipients(&target, &lists).join(", ");
        Ok((target, cc))
    }

    /// Sender display name, else address. An unparseable `From` is
    /// returned as is.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if there is no `From`, and load failures.
    pub async fn from_display(&self, entity: &MailEntity, ctx: &Context) -> Result<String> {
        let from = self.header(entity, "From", ctx).await?;
        match Mailbox::parse(&from) {
            Ok(mailbox) => Ok(mailbox.display_name().to_string()),
            Err(e) => {
                tracing::warn!(?e, from = %from, "Invalid sender address");
                Ok(from)
            }
        }
    }

    /// The `Date` header as sent.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] without a `Date`, [`Error::Decode`] if it cannot
    /// be parsed, and load failures.
    pub async fn original_time(
        &self,
        entity: &MailEntity,
        ctx: &Context,
    ) -> Result<DateTime<FixedOffset>> {
        let date = self.header(entity, "Date", ctx).await?;
        parse_date(&date).ok_or_else(|| Error::Decode(format!("unparseable date {date:?}")))
    }

    /// The date in local time, formatted for a message list.
    ///
    /// # Errors
    ///
    /// See [`Self::original_time`].
    pub async fn time_fmt(&self, entity: &MailEntity, ctx: &Context) -> Result<String> {
        let time = self.original_time(entity, ctx).await?;
        Ok(format_list_time(time.with_timezone(&Local), Local::now()))
    }
}
