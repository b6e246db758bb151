//! # cmdmail-mime
//!
//! MIME reading primitives for the cmdmail message core.
//!
//! ## Features
//!
//! - **Transcoding**: the provider's URL-safe base64 variant, base64 and
//!   Quoted-Printable transfer encodings, charset conversion to UTF-8 and
//!   scrubbing of terminal control characters
//! - **Part trees**: a recursive [`MimePart`] value built from raw message
//!   text or from a provider payload
//! - **Headers**: ordered, case-insensitive header lists, content types,
//!   dispositions and mailbox lists
//!
//! ## Quick Start
//!
//! ```ignore
//! use cmdmail_mime::{MimePart, encoding};
//!
//! let raw = encoding::decode_base64url(&payload_raw)?;
//! let tree = MimePart::parse(&raw)?;
//! if let MimePart::Leaf(leaf) = &tree {
//!     println!("{}", encoding::strip_unprintable(&leaf.decode_text()?));
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod content_type;
mod error;
mod header;
mod part;

pub mod encoding;

pub use address::{Mailbox, split_list};
pub use content_type::{ContentDisposition, ContentType};
pub use error::{Error, Result};
pub use header::Headers;
pub use part::{Container, Leaf, LeafBody, MAX_DEPTH, MimePart, split_head_body, split_multipart};
