//! RFC 5322 mailbox parsing, enough for reply handling.

use std::fmt;

use crate::error::{Error, Result};

/// A mailbox: optional display name and an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name, unquoted.
    pub name: Option<String>,
    /// `local@domain`.
    pub address: String,
}

impl Mailbox {
    /// Parses a single mailbox such as `"Jane Doe" <jane@example.com>` or
    /// `jane@example.com`.
    ///
    /// # Errors
    ///
    /// Returns an error if no plausible address is present.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, address) = match (s.rfind('<'), s.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = unquote(s[..open].trim());
                let name = (!name.is_empty()).then_some(name);
                (name, s[open + 1..close].trim().to_string())
            }
            (None, None) => (None, s.to_string()),
            _ => return Err(Error::Parse(format!("unbalanced angle brackets: {s:?}"))),
        };

        validate(&address)?;
        Ok(Self { name, address })
    }

    /// Parses a comma-separated mailbox list. Commas inside quotes or angle
    /// brackets do not split.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry is not a valid mailbox.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        split_list(s)
            .iter()
            .map(|entry| Self::parse(entry))
            .collect()
    }

    /// Display name if present, else the address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Splits a header value into list entries, ignoring empty ones.
#[must_use]
pub fn split_list(s: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut angle = 0usize;

    for c in s.chars() {
        match c {
            '"' => quoted = !quoted,
            '<' if !quoted => angle += 1,
            '>' if !quoted => angle = angle.saturating_sub(1),
            ',' if !quoted && angle == 0 => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    entries.push(current);

    entries
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

fn unquote(s: &str) -> String {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map_or_else(|| s.to_string(), |s| s.replace("\\\"", "\""))
}

fn validate(address: &str) -> Result<()> {
    match address.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !address.contains(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(Error::Parse(format!("not an address: {address:?}"))),
    }
}
