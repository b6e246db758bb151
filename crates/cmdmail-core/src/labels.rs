//! Labels and their terminal colors.

use std::sync::{PoisonError, RwLock};

use tokio::sync::{Mutex, MutexGuard};

use crate::display::NORMAL;
use crate::provider::LabelInfo;

/// The inbox.
pub const INBOX: &str = "INBOX";
/// The trash.
pub const TRASH: &str = "TRASH";
/// Marks a message as unread.
pub const UNREAD: &str = "UNREAD";
/// Marks a message as starred.
pub const STARRED: &str = "STARRED";

const DEFAULT_INBOX_FG: &str = "#000000";
const DEFAULT_INBOX_BG: &str = "#ffffff";

/// Palette index used for an unknown foreground color.
pub const FOREGROUND_FALLBACK: u8 = 50;
/// Palette index used for an unknown background color.
pub const BACKGROUND_FALLBACK: u8 = 200;

/// Name shown for a label whose metadata could not be fetched.
pub const UNKNOWN_NAME: &str = "<unknown>";

fn palette(hex: &str) -> Option<u8> {
    let index = match hex.trim().to_ascii_lowercase().as_str() {
        "#000000" => 232,
        "#666666" => 238,
        "#999999" => 248,
        "#ffffff" => 255,

        "#4986e7" => 21,
        "#fb4c2f" => 9,
        "#ffad46" => 208,
        "#16a765" => 28,

        "#434343" | "#cccccc" | "#efefef" | "#f3f3f3" | "#ffad47" | "#fad165" | "#16a766"
        | "#43d692" | "#4a86e8" | "#a479e2" | "#f691b3" | "#f6c5be" | "#ffe6c7" | "#fef1d1"
        | "#b9e4d0" => 240,

        "#c6f3de" | "#c9daf8" | "#e4d7f5" | "#fcdee8" | "#efa093" | "#ffd6a2" | "#fce8b3"
        | "#89d3b2" | "#a0eac9" | "#a4c2f4" | "#d0bcf1" | "#fbc8d9" | "#e66550" | "#ffbc6b"
        | "#fcda83" | "#44b984" | "#68dfa9" | "#6d9eeb" | "#b694e8" | "#f7a7c0" | "#cc3a21"
        | "#eaa041" | "#f2c960" | "#149e60" | "#3dc789" | "#3c78d8" | "#8e63ce" | "#e07798"
        | "#ac2b16" | "#cf8933" | "#d5ae49" | "#0b804b" | "#2a9c68" | "#285bac" | "#653e9b"
        | "#b65775" | "#822111" | "#a46a21" | "#aa8831" | "#076239" | "#1a764d" | "#1c4587"
        | "#41236d" | "#83334c" => 200,

        "#711a36" => 52,
        "#fbd3e0" => 205,
        "#fbe983" => 11,
        "#594c05" => 58,
        "#b3efd3" => 79,
        "#0b4f30" => 22,
        _ => return None,
    };
    Some(index)
}

/// Maps a hex RGB foreground to a 256-color palette index.
///
/// Unknown input yields [`FOREGROUND_FALLBACK`].
#[must_use]
pub fn color_index(hex: &str) -> u8 {
    palette(hex).unwrap_or_else(|| {
        tracing::warn!(color = hex, "Unknown foreground color");
        FOREGROUND_FALLBACK
    })
}

/// Maps a hex RGB background to a 256-color palette index.
///
/// Unknown input yields [`BACKGROUND_FALLBACK`].
#[must_use]
pub fn background_index(hex: &str) -> u8 {
    palette(hex).unwrap_or_else(|| {
        tracing::warn!(color = hex, "Unknown background color");
        BACKGROUND_FALLBACK
    })
}

/// Escape sequence selecting the given foreground and background.
#[must_use]
pub fn color_code(foreground: &str, background: &str) -> String {
    format!(
        "\x1b[38;5;{}m\x1b[48;5;{}m",
        color_index(foreground),
        background_index(background)
    )
}

/// A label shared by every entity that carries its ID.
///
/// Metadata is loaded at most once; see
/// [`Connection::label`](crate::Connection::label).
#[derive(Debug)]
pub struct Label {
    id: String,
    info: RwLock<Option<LabelInfo>>,
    gate: Mutex<()>,
}

impl Label {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            info: RwLock::new(None),
            gate: Mutex::new(()),
        }
    }

    /// Label ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Metadata, if loaded.
    #[must_use]
    pub fn info(&self) -> Option<LabelInfo> {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether metadata has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Display name, or [`UNKNOWN_NAME`] if metadata is missing.
    #[must_use]
    pub fn name(&self) -> String {
        self.info()
            .map_or_else(|| UNKNOWN_NAME.to_string(), |info| info.name)
    }

    pub(crate) fn set_info(&self, info: LabelInfo) {
        *self.info.write().unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    pub(crate) async fn lock_fetch(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Escape sequence for this label's colors.
    ///
    /// `None` when metadata is missing or the label has no colors. The
    /// inbox gets black on white unless it has colors of its own.
    #[must_use]
    pub fn color_code(&self) -> Option<String> {
        let info = self.info()?;
        match info.color {
            Some(color) => Some(color_code(&color.text_color, &color.background_color)),
            None if self.id == INBOX => Some(color_code(DEFAULT_INBOX_FG, DEFAULT_INBOX_BG)),
            None => None,
        }
    }

    /// The name in the label's colors.
    #[must_use]
    pub fn label_string(&self) -> String {
        let color = self.color_code();
        format!("{}{}{NORMAL}", color.as_deref().unwrap_or(NORMAL), self.name())
    }

    /// The first character of the name in the label's colors, or `None` for
    /// an uncolored label.
    #[must_use]
    pub fn color_char(&self) -> Option<String> {
        let color = self.color_code()?;
        let first = self.name().chars().next()?;
        Some(format!("{color}{first}"))
    }
}
