//! Remote mail provider interface and wire types.
//!
//! The wire types mirror the provider's JSON (`camelCase` field names).
//! Every body and attachment payload is in the provider's URL-safe base64
//! variant; see [`cmdmail_mime::encoding::decode_base64url`].

mod memory;

use std::future::Future;

use cmdmail_mime::{Headers, Leaf, LeafBody, MimePart, encoding};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::level::FetchLevel;

pub use memory::{CallCounts, MemoryProvider};

/// Result of a provider call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Response shape requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Identity, thread and labels.
    Minimal,
    /// Minimal plus top-level headers.
    Metadata,
    /// The full part tree.
    Full,
    /// The whole RFC 5322 message, base64url-encoded.
    Raw,
}

impl From<FetchLevel> for MessageFormat {
    fn from(level: FetchLevel) -> Self {
        match level {
            FetchLevel::Empty | FetchLevel::Minimal => Self::Minimal,
            FetchLevel::Metadata => Self::Metadata,
            FetchLevel::Full => Self::Full,
        }
    }
}

/// One header field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderField {
    /// Field name in its original spelling.
    pub name: String,
    /// Raw field value.
    pub value: String,
}

/// Body of a payload part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartBody {
    /// Handle for fetching the data separately.
    pub attachment_id: Option<String>,
    /// Decoded size in bytes.
    pub size: u64,
    /// Inline data in the provider base64 variant.
    pub data: Option<String>,
}

/// A part of the provider's structured message tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Payload {
    /// `type/subtype`.
    pub mime_type: String,
    /// Attachment filename, empty if none.
    pub filename: String,
    /// Part headers.
    pub headers: Vec<HeaderField>,
    /// Part body.
    pub body: PartBody,
    /// Child parts.
    pub parts: Vec<Self>,
}

impl Payload {
    /// The part headers as an ordered header list.
    #[must_use]
    pub fn header_list(&self) -> Headers {
        self.headers
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect()
    }

    /// Converts this payload into a MIME tree. A part with children is a
    /// container; anything else is a leaf.
    #[must_use]
    pub fn to_mime(&self) -> MimePart {
        let mime_type = self.mime_type.trim().to_ascii_lowercase();
        let headers = self.header_list();
        if self.parts.is_empty() {
            MimePart::Leaf(Leaf {
                mime_type,
                headers,
                filename: (!self.filename.is_empty()).then(|| self.filename.clone()),
                body: LeafBody::Provider {
                    data: self.body.data.clone(),
                    attachment_id: self.body.attachment_id.clone(),
                    size: self.body.size,
                },
            })
        } else {
            MimePart::Container(cmdmail_mime::Container {
                mime_type,
                headers,
                children: self.parts.iter().map(Self::to_mime).collect(),
            })
        }
    }

    /// Builds a payload from a raw RFC 5322 message, the way the provider
    /// would present it: transfer encodings removed and data re-encoded in
    /// the provider base64 variant.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be parsed or a part body is
    /// not valid for its transfer encoding.
    pub fn from_raw(raw: &[u8]) -> cmdmail_mime::Result<Self> {
        Self::from_mime(&MimePart::parse(raw)?)
    }

    fn from_mime(part: &MimePart) -> cmdmail_mime::Result<Self> {
        let headers = part
            .headers()
            .iter()
            .map(|(name, value)| HeaderField {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect();
        let mut payload = Self {
            mime_type: part.mime_type().to_string(),
            filename: part.filename().unwrap_or_default(),
            headers,
            ..Self::default()
        };
        match part {
            MimePart::Leaf(leaf) => {
                let data = leaf.decode_bytes()?;
                payload.body = PartBody {
                    attachment_id: None,
                    size: data.len() as u64,
                    data: Some(encoding::encode_base64url(&data)),
                };
            }
            MimePart::Container(container) => {
                payload.parts = container
                    .children
                    .iter()
                    .map(Self::from_mime)
                    .collect::<cmdmail_mime::Result<_>>()?;
            }
        }
        Ok(payload)
    }
}

/// A message as returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderMessage {
    /// Opaque message ID.
    pub id: String,
    /// Thread the message belongs to.
    pub thread_id: String,
    /// Label IDs currently applied.
    pub label_ids: Vec<String>,
    /// Part tree; absent in the minimal and raw formats.
    pub payload: Option<Payload>,
    /// Whole message in the provider base64 variant; raw format only.
    pub raw: Option<String>,
}

/// A draft as returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderDraft {
    /// Opaque draft ID.
    pub id: String,
    /// The draft's message.
    pub message: ProviderMessage,
}

/// Label colors as hex RGB strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelColor {
    /// Foreground, e.g. `#000000`.
    pub text_color: String,
    /// Background, e.g. `#ffffff`.
    pub background_color: String,
}

/// Label metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelInfo {
    /// Label ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Colors, if the user set any.
    pub color: Option<LabelColor>,
}

/// The remote mail provider.
///
/// Implementations do not need to handle cancellation: callers race every
/// call against their [`Context`](crate::Context) and drop it when the
/// scope ends.
pub trait MailProvider: Send + Sync + 'static {
    /// Fetches a message in the given format.
    fn get_message(
        &self,
        id: &str,
        format: MessageFormat,
    ) -> impl Future<Output = ProviderResult<ProviderMessage>> + Send;

    /// Fetches a draft in the given format.
    fn get_draft(
        &self,
        id: &str,
        format: MessageFormat,
    ) -> impl Future<Output = ProviderResult<ProviderDraft>> + Send;

    /// Adds and removes labels, returning the resulting label set.
    fn modify_labels(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> impl Future<Output = ProviderResult<Vec<String>>> + Send;

    /// Fetches attachment data in the provider base64 variant.
    fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> impl Future<Output = ProviderResult<String>> + Send;

    /// Replaces a draft's content with `raw`, a whole message in the
    /// provider base64 variant.
    fn update_draft(&self, id: &str, raw: &str) -> impl Future<Output = ProviderResult<()>> + Send;

    /// Sends a draft. The draft ceases to exist.
    fn send_draft(&self, id: &str) -> impl Future<Output = ProviderResult<()>> + Send;

    /// Deletes a draft.
    fn delete_draft(&self, id: &str) -> impl Future<Output = ProviderResult<()>> + Send;

    /// Fetches one label's metadata.
    fn get_label(&self, id: &str) -> impl Future<Output = ProviderResult<LabelInfo>> + Send;

    /// Lists all labels.
    fn list_labels(&self) -> impl Future<Output = ProviderResult<Vec<LabelInfo>>> + Send;
}
