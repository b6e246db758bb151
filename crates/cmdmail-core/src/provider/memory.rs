//! In-memory provider.
//!
//! Serves messages, drafts, labels and attachments from memory, counting
//! every call. Optional latency and one-shot failures make it usable for
//! exercising the cache and concurrency paths without a network.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cmdmail_mime::encoding;

use super::{
    LabelInfo, MailProvider, MessageFormat, Payload, ProviderDraft, ProviderMessage,
    ProviderResult,
};
use crate::error::ProviderError;

/// Number of calls made per provider operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct CallCounts {
    pub get_message: usize,
    pub get_draft: usize,
    pub modify_labels: usize,
    pub get_attachment: usize,
    pub update_draft: usize,
    pub send_draft: usize,
    pub delete_draft: usize,
    pub get_label: usize,
    pub list_labels: usize,
}

#[derive(Debug, Default)]
struct State {
    messages: HashMap<String, ProviderMessage>,
    drafts: HashMap<String, ProviderMessage>,
    labels: HashMap<String, LabelInfo>,
    attachments: HashMap<(String, String), String>,
    sent: Vec<String>,
    fail_next: Option<ProviderError>,
    calls: CallCounts,
}

/// A [`MailProvider`] backed by in-memory maps.
///
/// Messages are stored in full; narrower formats are cut down on the way
/// out the way the remote provider does.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a message, replacing any with the same ID.
    pub fn insert_message(&self, message: ProviderMessage) {
        self.state().messages.insert(message.id.clone(), message);
    }

    /// Stores a message built from raw RFC 5322 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be parsed.
    pub fn insert_raw(
        &self,
        id: &str,
        label_ids: &[&str],
        raw: &[u8],
    ) -> cmdmail_mime::Result<()> {
        let message = ProviderMessage {
            id: id.to_string(),
            thread_id: id.to_string(),
            label_ids: label_ids.iter().map(ToString::to_string).collect(),
            payload: Some(Payload::from_raw(raw)?),
            raw: Some(encoding::encode_base64url(raw)),
        };
        self.insert_message(message);
        Ok(())
    }

    /// Stores a draft.
    pub fn insert_draft(&self, draft: ProviderDraft) {
        self.state().drafts.insert(draft.id.clone(), draft.message);
    }

    /// Stores label metadata.
    pub fn insert_label(&self, label: LabelInfo) {
        self.state().labels.insert(label.id.clone(), label);
    }

    /// Stores attachment data for `message_id`.
    pub fn insert_attachment(&self, message_id: &str, attachment_id: &str, data: &[u8]) {
        self.state().attachments.insert(
            (message_id.to_string(), attachment_id.to_string()),
            encoding::encode_base64url(data),
        );
    }

    /// Makes the next call of any kind fail with `error`.
    pub fn fail_next(&self, error: ProviderError) {
        self.state().fail_next = Some(error);
    }

    /// Calls made so far.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// IDs of drafts sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// A stored message as it currently stands.
    #[must_use]
    pub fn stored_message(&self, id: &str) -> Option<ProviderMessage> {
        self.state().messages.get(id).cloned()
    }

    /// A stored draft message as it currently stands.
    #[must_use]
    pub fn stored_draft(&self, id: &str) -> Option<ProviderMessage> {
        self.state().drafts.get(id).cloned()
    }

    /// Counts the call, waits out the latency and consumes any injected
    /// failure.
    async fn begin(&self, count: impl FnOnce(&mut CallCounts)) -> ProviderResult<()> {
        count(&mut self.state().calls);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.state().fail_next.take().map_or(Ok(()), Err)
    }
}

/// Cuts a stored message down to what `format` returns.
fn shape(message: &ProviderMessage, format: MessageFormat) -> ProviderMessage {
    let mut out = ProviderMessage {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        label_ids: message.label_ids.clone(),
        payload: None,
        raw: None,
    };
    match format {
        MessageFormat::Minimal => {}
        MessageFormat::Metadata => {
            out.payload = message.payload.as_ref().map(|p| Payload {
                mime_type: p.mime_type.clone(),
                headers: p.headers.clone(),
                ..Payload::default()
            });
        }
        MessageFormat::Full => out.payload.clone_from(&message.payload),
        MessageFormat::Raw => out.raw.clone_from(&message.raw),
    }
    out
}

fn not_found(kind: &str, id: &str) -> ProviderError {
    ProviderError::NotFound(format!("{kind} {id}"))
}

impl MailProvider for MemoryProvider {
    async fn get_message(&self, id: &str, format: MessageFormat) -> ProviderResult<ProviderMessage> {
        self.begin(|c| c.get_message += 1).await?;
        let state = self.state();
        let message = state
            .messages
            .get(id)
            .ok_or_else(|| not_found("message", id))?;
        if format == MessageFormat::Raw && message.raw.is_none() {
            return Err(ProviderError::Rejected(format!(
                "raw format unavailable for {id}"
            )));
        }
        Ok(shape(message, format))
    }

    async fn get_draft(&self, id: &str, format: MessageFormat) -> ProviderResult<ProviderDraft> {
        self.begin(|c| c.get_draft += 1).await?;
        let state = self.state();
        let message = state.drafts.get(id).ok_or_else(|| not_found("draft", id))?;
        Ok(ProviderDraft {
            id: id.to_string(),
            message: shape(message, format),
        })
    }

    async fn modify_labels(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> ProviderResult<Vec<String>> {
        self.begin(|c| c.modify_labels += 1).await?;
        let mut state = self.state();
        let message = state
            .messages
            .get_mut(id)
            .ok_or_else(|| not_found("message", id))?;
        message.label_ids.retain(|l| !remove.contains(l));
        for label in add {
            if !message.label_ids.contains(label) {
                message.label_ids.push(label.clone());
            }
        }
        Ok(message.label_ids.clone())
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> ProviderResult<String> {
        self.begin(|c| c.get_attachment += 1).await?;
        self.state()
            .attachments
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| not_found("attachment", attachment_id))
    }

    async fn update_draft(&self, id: &str, raw: &str) -> ProviderResult<()> {
        self.begin(|c| c.update_draft += 1).await?;
        let bytes = encoding::decode_base64url(raw)
            .map_err(|e| ProviderError::Rejected(format!("invalid raw message: {e}")))?;
        let payload = Payload::from_raw(&bytes)
            .map_err(|e| ProviderError::Rejected(format!("unparseable message: {e}")))?;

        let mut state = self.state();
        let message = state.drafts.get_mut(id).ok_or_else(|| not_found("draft", id))?;
        message.payload = Some(payload);
        message.raw = Some(raw.to_string());
        Ok(())
    }

    async fn send_draft(&self, id: &str) -> ProviderResult<()> {
        self.begin(|c| c.send_draft += 1).await?;
        let mut state = self.state();
        state.drafts.remove(id).ok_or_else(|| not_found("draft", id))?;
        state.sent.push(id.to_string());
        Ok(())
    }

    async fn delete_draft(&self, id: &str) -> ProviderResult<()> {
        self.begin(|c| c.delete_draft += 1).await?;
        self.state()
            .drafts
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("draft", id))
    }

    async fn get_label(&self, id: &str) -> ProviderResult<LabelInfo> {
        self.begin(|c| c.get_label += 1).await?;
        self.state()
            .labels
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("label", id))
    }

    async fn list_labels(&self) -> ProviderResult<Vec<LabelInfo>> {
        self.begin(|c| c.list_labels += 1).await?;
        let mut labels: Vec<_> = self.state().labels.values().cloned().collect();
        labels.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(labels)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn provider() -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider
            .insert_raw(
                "m1",
                &["INBOX"],
                b"Subject: Hi\r\nContent-Type: text/plain\r\n\r\nhello",
            )
            .unwrap();
        provider
    }

    #[tokio::test]
    async fn test_formats() {
        let provider = provider();

        let minimal = provider.get_message("m1", MessageFormat::Minimal).await.unwrap();
        assert!(minimal.payload.is_none());
        assert_eq!(minimal.label_ids, vec!["INBOX"]);

        let metadata = provider.get_message("m1", MessageFormat::Metadata).await.unwrap();
        let payload = metadata.payload.unwrap();
        assert_eq!(payload.headers.len(), 2);
        assert!(payload.body.data.is_none());

        let full = provider.get_message("m1", MessageFormat::Full).await.unwrap();
        assert!(full.payload.unwrap().body.data.is_some());

        let raw = provider.get_message("m1", MessageFormat::Raw).await.unwrap();
        assert!(raw.raw.is_some());

        assert_eq!(provider.calls().get_message, 4);
    }

    #[tokio::test]
    async fn test_missing_message() {
        let provider = provider();
        let err = provider
            .get_message("nope", MessageFormat::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let provider = provider();
        provider.fail_next(ProviderError::Transport("reset".into()));
        assert!(provider.get_message("m1", MessageFormat::Minimal).await.is_err());
        assert!(provider.get_message("m1", MessageFormat::Minimal).await.is_ok());
    }

    #[tokio::test]
    async fn test_modify_labels() {
        let provider = provider();
        let labels = provider
            .modify_labels("m1", &["STARRED".into()], &["INBOX".into()])
            .await
            .unwrap();
        assert_eq!(labels, vec!["STARRED"]);
        assert_eq!(provider.stored_message("m1").unwrap().label_ids, labels);
    }

    #[tokio::test]
    async fn test_attachment_roundtrip() {
        let provider = provider();
        provider.insert_attachment("m1", "a1", b"\xfb\xff");
        let data = provider.get_attachment("m1", "a1").await.unwrap();
        assert_eq!(encoding::decode_base64url(&data).unwrap(), b"\xfb\xff");
    }

    #[tokio::test]
    async fn test_draft_lifecycle() {
        let provider = provider();
        provider.insert_draft(ProviderDraft {
            id: "d1".into(),
            message: ProviderMessage {
                id: "dm1".into(),
                ..ProviderMessage::default()
            },
        });

        let raw = encoding::encode_base64url(b"Subject: New\r\n\r\nbody");
        provider.update_draft("d1", &raw).await.unwrap();
        let stored = provider.stored_draft("d1").unwrap();
        assert_eq!(stored.payload.unwrap().headers[0].value, "New");

        provider.send_draft("d1").await.unwrap();
        assert_eq!(provider.sent(), vec!["d1"]);
        assert!(provider.delete_draft("d1").await.is_err());
    }
}
