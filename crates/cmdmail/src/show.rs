//! Printing messages and saving attachments.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use cmdmail_core::display::{BOLD, GREEN, GREY, RED, RESET};
use cmdmail_core::{
    Attachment, Connection, Context, CryptoEngine, Error, HtmlRenderer, MailEntity, MailProvider,
    TrustStatus,
};

fn describe_trust(status: Option<&TrustStatus>) -> String {
    match status {
        None => "not signed".to_string(),
        Some(s) if s.good => format!("{GREEN}good signature by {}{RESET}", s.signer),
        Some(s) if s.verified => {
            format!("{RED}BAD signature by {}: {}{RESET}", s.signer, s.detail)
        }
        Some(s) if s.detail.is_empty() => "decrypted, not signed".to_string(),
        Some(s) => format!("{GREY}not verified: {}{RESET}", s.detail),
    }
}

fn print_field(name: &str, value: &str) {
    println!("{BOLD}{name}:{RESET} {value}");
}

/// A header, or `None` when the message does not have it.
async fn optional<P, C, R>(
    conn: &Connection<P, C, R>,
    message: &MailEntity,
    key: &str,
    ctx: &Context,
) -> Result<Option<String>>
where
    P: MailProvider,
    C: CryptoEngine,
    R: HtmlRenderer,
{
    match conn.header(message, key, ctx).await {
        Ok(value) => Ok(Some(value)),
        Err(Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// What `show` prints.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShowOptions {
    pub html: bool,
    pub unpatched: bool,
    /// Label metadata was loaded, so label names can be shown.
    pub labels: bool,
}

pub async fn show<P, C, R>(
    conn: &Connection<P, C, R>,
    message: &MailEntity,
    options: ShowOptions,
    ctx: &Context,
) -> Result<()>
where
    P: MailProvider,
    C: CryptoEngine,
    R: HtmlRenderer,
{
    let from = match conn.from_display(message, ctx).await {
        Ok(from) => from,
        Err(Error::NotFound(_)) => "(unknown sender)".to_string(),
        Err(e) => return Err(e.into()),
    };
    print_field("From", &from);
    for key in ["To", "Cc", "Subject"] {
        if let Some(value) = optional(conn, message, key, ctx).await? {
            print_field(key, &value);
        }
    }
    match conn.time_fmt(message, ctx).await {
        Ok(time) => print_field("Date", &time),
        Err(Error::NotFound(_)) => {}
        Err(Error::Decode(e)) => {
            tracing::warn!(%e, "Showing date as sent");
            if let Some(date) = optional(conn, message, "Date", ctx).await? {
                print_field("Date", &date);
            }
        }
        Err(e) => return Err(e.into()),
    }

    if options.labels {
        let labels = conn.labels_string(message, ctx).await?;
        if !labels.is_empty() {
            print_field("Labels", &labels);
        }
    }
    let trust = conn.trust_status(message, ctx).await?;
    print_field("Trust", &describe_trust(trust.as_ref()));
    for failure in conn.trust_diagnostics(message, ctx).await? {
        print_field("Warning", &format!("{RED}{failure}{RESET}"));
    }
    println!();

    let body = if options.unpatched {
        conn.unpatched_body(message, ctx).await?
    } else if options.html {
        conn.body_html(message, ctx).await?
    } else {
        conn.body(message, ctx).await?
    };
    println!("{body}");

    let attachments = conn.attachments(message, ctx).await?;
    if !attachments.is_empty() {
        println!();
        for (i, attachment) in attachments.iter().enumerate() {
            println!(
                "  [{}] {} ({}, {} bytes)",
                i + 1,
                attachment.name(),
                attachment.mime_type(),
                attachment.size()
            );
        }
    }
    Ok(())
}

fn find_attachment(attachments: &[Arc<Attachment>], wanted: &str) -> Option<Arc<Attachment>> {
    if let Ok(position) = wanted.parse::<usize>()
        && let Some(found) = position.checked_sub(1).and_then(|i| attachments.get(i))
    {
        return Some(Arc::clone(found));
    }
    attachments
        .iter()
        .find(|a| a.filename() == wanted || a.name() == wanted)
        .cloned()
}

pub async fn save<P, C, R>(
    conn: &Connection<P, C, R>,
    message: &MailEntity,
    wanted: &str,
    output: Option<&Path>,
    ctx: &Context,
) -> Result<()>
where
    P: MailProvider,
    C: CryptoEngine,
    R: HtmlRenderer,
{
    let attachments = conn.attachments(message, ctx).await?;
    let attachment = find_attachment(&attachments, wanted)
        .ok_or_else(|| anyhow!("no attachment {wanted:?} in {}", message.id()))?;

    let output = match output {
        Some(path) => path.to_path_buf(),
        None if !attachment.filename().is_empty() => {
            // Final path component only.
            let name = Path::new(attachment.filename())
                .file_name()
                .ok_or_else(|| anyhow!("unusable filename {:?}", attachment.filename()))?;
            name.into()
        }
        None => return Err(anyhow!("attachment has no filename; pass --output")),
    };

    let data = conn.download(&attachment, ctx).await?;
    tokio::fs::write(&output, data).await?;
    tracing::info!(path = %output.display(), size = data.len(), "Saved attachment");
    Ok(())
}
