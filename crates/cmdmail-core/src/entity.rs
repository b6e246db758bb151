//! Cached messages and drafts.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use cmdmail_mime::Leaf;
use tokio::sync::{Mutex, MutexGuard, OnceCell};

use crate::error::CryptoError;
use crate::labels::UNREAD;
use crate::level::FetchLevel;
use crate::trust::TrustStatus;

/// Whether an entity is a message or a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A message.
    Message,
    /// A draft.
    Draft,
}

/// Everything known about an entity at one point in time.
///
/// Snapshots are immutable once published; every change swaps in a new
/// one.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// How much of this snapshot is authoritative.
    pub level: FetchLevel,
    /// Thread ID (Minimal and up).
    pub thread_id: String,
    /// Applied label IDs.
    pub label_ids: Vec<String>,
    /// Top-level headers keyed by lowercased name (Metadata and up).
    pub headers: HashMap<String, String>,
    /// Plain-preferring rendering (Full).
    pub body: String,
    /// HTML-preferring rendering (Full).
    pub body_html: String,
    /// `body` before inline signature annotation and attachment
    /// placeholders (Full).
    pub original_body: String,
    /// Envelope trust status; `None` when there was no envelope.
    pub trust: Option<TrustStatus>,
    /// Contained crypto failures from the last full load.
    pub diagnostics: Vec<CryptoError>,
    /// Attachments found in the last full load.
    pub attachments: Vec<Arc<Attachment>>,
    /// Decoded raw message, once fetched.
    pub raw: Option<Arc<Vec<u8>>>,
}

/// A message or draft in a connection's pool.
///
/// Obtained from [`Connection::message`](crate::Connection::message) or
/// [`Connection::draft`](crate::Connection::draft); never constructed
/// directly, so one ID maps to one instance.
#[derive(Debug)]
pub struct MailEntity {
    id: String,
    kind: EntityKind,
    state: RwLock<Arc<Snapshot>>,
    gate: Mutex<()>,
}

impl MailEntity {
    pub(crate) fn new(id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            state: RwLock::new(Arc::new(Snapshot::default())),
            gate: Mutex::new(()),
        }
    }

    /// Provider ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Message or draft.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The recorded fetch level.
    #[must_use]
    pub fn level(&self) -> FetchLevel {
        self.snapshot().level
    }

    /// Whether the recorded level satisfies `level`.
    #[must_use]
    pub fn has_level(&self, level: FetchLevel) -> bool {
        self.level().satisfies(level)
    }

    /// Label IDs as currently known, without fetching.
    #[must_use]
    pub fn label_ids(&self) -> Vec<String> {
        self.snapshot().label_ids.clone()
    }

    /// Whether the label is currently known to be applied.
    #[must_use]
    pub fn has_label(&self, label_id: &str) -> bool {
        self.snapshot().label_ids.iter().any(|l| l == label_id)
    }

    /// Whether the message is unread.
    #[must_use]
    pub fn is_unread(&self) -> bool {
        self.has_label(UNREAD)
    }

    /// Adds a label locally only, for fast feedback. The next
    /// authoritative load overwrites it. No-op before anything is fetched.
    pub fn add_label_local(&self, label_id: &str) {
        self.update(|s| {
            if s.level != FetchLevel::Empty && !s.label_ids.iter().any(|l| l == label_id) {
                s.label_ids.push(label_id.to_string());
            }
        });
    }

    /// Removes a label locally only; see [`Self::add_label_local`].
    pub fn remove_label_local(&self, label_id: &str) {
        self.update(|s| {
            if s.level != FetchLevel::Empty {
                s.label_ids.retain(|l| l != label_id);
            }
        });
    }

    /// Publishes a new snapshot.
    pub(crate) fn replace(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        snapshot
    }

    /// Edits the current snapshot in place, copying it if shared.
    pub(crate) fn update(&self, edit: impl FnOnce(&mut Snapshot)) -> Arc<Snapshot> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        edit(Arc::make_mut(&mut state));
        Arc::clone(&state)
    }

    /// Forgets everything; the next access refetches.
    pub(crate) fn invalidate(&self) {
        self.replace(Snapshot::default());
    }

    /// Serializes fetches for this entity.
    pub(crate) async fn lock_fetch(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

/// An attachment of a message.
///
/// Holds only what it needs from the part it came from. Data is fetched at
/// most once through
/// [`Connection::download`](crate::Connection::download) and kept.
#[derive(Debug)]
pub struct Attachment {
    message_id: String,
    attachment_id: Option<String>,
    filename: String,
    mime_type: String,
    size: u64,
    contents: OnceCell<Vec<u8>>,
}

impl Attachment {
    /// Describes `leaf`, preloading its data if it is inline.
    pub(crate) fn from_leaf(message_id: &str, leaf: &Leaf, filename: String) -> Self {
        let attachment_id = leaf.attachment_id().map(str::to_string);
        let contents = if attachment_id.is_none() {
            match leaf.decode_bytes() {
                Ok(data) => OnceCell::new_with(Some(data)),
                Err(e) => {
                    tracing::warn!(?e, filename = %filename, "Undecodable inline attachment");
                    OnceCell::new()
                }
            }
        } else {
            OnceCell::new()
        };
        Self {
            message_id: message_id.to_string(),
            attachment_id,
            filename,
            mime_type: leaf.mime_type.clone(),
            size: leaf.size(),
            contents,
        }
    }

    /// ID of the owning message.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Provider handle, if the data lives remotely.
    #[must_use]
    pub fn attachment_id(&self) -> Option<&str> {
        self.attachment_id.as_deref()
    }

    /// Filename; may be empty.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Filename, or the MIME type for unnamed parts.
    #[must_use]
    pub fn name(&self) -> &str {
        if self.filename.is_empty() {
            &self.mime_type
        } else {
            &self.filename
        }
    }

    /// `type/subtype`.
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Size in bytes as reported.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Cached data, if already present.
    #[must_use]
    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.get().map(Vec::as_slice)
    }

    pub(crate) const fn cell(&self) -> &OnceCell<Vec<u8>> {
        &self.contents
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_local_labels_need_data() {
        let entity = MailEntity::new("m1", EntityKind::Message);
        entity.add_label_local("STARRED");
        assert!(entity.label_ids().is_empty());

        entity.replace(Snapshot {
            level: FetchLevel::Minimal,
            label_ids: vec!["INBOX".into(), UNREAD.into()],
            ..Snapshot::default()
        });
        assert!(entity.is_unread());

        entity.add_label_local("STARRED");
        entity.add_label_local("STARRED");
        entity.remove_label_local(UNREAD);
        assert_eq!(entity.label_ids(), vec!["INBOX", "STARRED"]);
        assert_eq!(entity.level(), FetchLevel::Minimal);
    }

    #[test]
    fn test_update_copies_shared_snapshot() {
        let entity = MailEntity::new("m1", EntityKind::Message);
        entity.replace(Snapshot {
            level: FetchLevel::Metadata,
            ..Snapshot::default()
        });
        let before = entity.snapshot();
        entity.add_label_local("INBOX");
        assert!(before.label_ids.is_empty());
        assert_eq!(entity.snapshot().label_ids, vec!["INBOX"]);
    }

    #[test]
    fn test_invalidate() {
        let entity = MailEntity::new("d1", EntityKind::Draft);
        entity.replace(Snapshot {
            level: FetchLevel::Full,
            body: "x".into(),
            ..Snapshot::default()
        });
        entity.invalidate();
        assert_eq!(entity.level(), FetchLevel::Empty);
        assert!(entity.snapshot().body.is_empty());
    }

    #[test]
    fn test_attachment_from_leaf() {
        let mut leaf = Leaf::text("application/pdf", "%PDF");
        leaf.filename = Some("x.pdf".into());
        let inline = Attachment::from_leaf("m1", &leaf, "x.pdf".into());
        assert_eq!(inline.contents(), Some(&b"%PDF"[..]));
        assert_eq!(inline.name(), "x.pdf");

        leaf.body = cmdmail_mime::LeafBody::Provider {
            data: None,
            attachment_id: Some("a1".into()),
            size: 1024,
        };
        let remote = Attachment::from_leaf("m1", &leaf, String::new());
        assert_eq!(remote.attachment_id(), Some("a1"));
        assert_eq!(remote.contents(), None);
        assert_eq!(remote.size(), 1024);
        assert_eq!(remote.name(), "application/pdf");
    }
}
