//! # cmdmail-core
//!
//! Materializes remote mail messages and drafts into displayable,
//! trust-annotated text.
//!
//! This crate provides:
//! - **Level cache**: per-entity snapshots fetched at the lowest fidelity a
//!   caller needs (Minimal, Metadata, Full), with concurrent fetches of the
//!   same entity coalesced
//! - **Body rendering**: reduction of a MIME tree to its best plain or HTML
//!   rendering, with HTML piped through an external renderer
//! - **Trust checks**: OpenPGP and S/MIME signed and encrypted envelopes,
//!   plus inline clear-signed blocks, through an injected crypto engine
//! - **Labels**: shared label metadata and terminal colors
//!
//! The remote provider, crypto engine and HTML renderer are traits
//! ([`MailProvider`], [`CryptoEngine`], [`HtmlRenderer`]) injected into a
//! [`Connection`]. Subprocess-backed implementations ([`GpgEngine`],
//! [`CommandRenderer`]) and an in-memory provider ([`MemoryProvider`]) are
//! included.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod connection;
mod context;
pub mod display;
mod entity;
mod error;
pub mod labels;
mod level;
mod materialize;
pub mod provider;
mod render;
mod trust;

pub use config::{CoreConfig, CoreConfigBuilder, CryptoConfig, RendererConfig};
pub use connection::{Connection, format_list_time};
pub use context::{Context, Interrupted};
pub use entity::{Attachment, EntityKind, MailEntity, Snapshot};
pub use error::{CryptoError, Error, ProviderError, Result};
pub use labels::{Label, color_code, color_index};
pub use level::FetchLevel;
pub use materialize::{Reducer, Rendered, attachment_placeholder};
pub use provider::{MailProvider, MemoryProvider, MessageFormat, ProviderMessage};
pub use render::{CommandRenderer, ConfiguredRenderer, HtmdRenderer, HtmlRenderer};
pub use trust::{CryptoEngine, Decrypted, GpgEngine, TrustStatus};
