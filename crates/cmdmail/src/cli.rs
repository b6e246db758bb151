//! Command line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Read Gmail-style messages in the terminal.
#[derive(Debug, Parser)]
#[command(name = "cmdmail", version, about, max_term_width = 80)]
pub struct Cli {
    /// Configuration file [default: <config dir>/cmdmail/config.json]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// JSON file with label metadata (a list of label resources)
    #[arg(long, global = true)]
    pub labels: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print a message: headers, labels, trust status, body and
    /// attachments.
    ///
    /// FILE is either a raw RFC 5322 message or, with a `.json` extension,
    /// a message resource as returned by the provider in `full` format.
    Show {
        file: PathBuf,
        /// Prefer the HTML rendering of the body.
        #[arg(long)]
        html: bool,
        /// Show the body without inline signature markers and attachment
        /// placeholders.
        #[arg(long, conflicts_with = "html")]
        unpatched: bool,
    },
    /// Write one attachment of a message to disk.
    Save {
        file: PathBuf,
        /// Attachment filename, or its 1-based position in the list.
        attachment: String,
        /// Where to write [default: the attachment's filename]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the raw source of a message.
    Raw { file: PathBuf },
}

impl Command {
    /// The message file the command reads.
    pub const fn file(&self) -> &PathBuf {
        match self {
            Self::Show { file, .. } | Self::Save { file, .. } | Self::Raw { file } => file,
        }
    }
}
