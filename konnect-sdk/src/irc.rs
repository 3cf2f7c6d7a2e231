//! IRC message decoding and encoding.
//!
//! Line format (RFC 1459/2812 with IRCv3 tag tolerance):
//!   [`@`tags SPACE] [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
//!
//! Parsing operates on a single line without its `\r\n` terminator.

use std::collections::HashMap;
use std::fmt;

/// A decoded IRC message. Produced once per line and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// IRCv3 message tags. Kept for consumers, never interpreted by the engine.
    pub tags: HashMap<String, String>,
    /// Origin: `nick!user@host` or a server name.
    pub prefix: Option<String>,
    /// Alphabetic command or three-digit numeric.
    pub command: String,
    /// Parameters; the last one may have been a trailing segment with spaces.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("line has no command")]
    MissingCommand,
}

impl Message {
    /// Build an outbound message with no prefix or tags.
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            command: command.to_string(),
            params,
            ..Default::default()
        }
    }

    /// Parse one line. Accepts a trailing `\r\n` or `\n`.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut rest = line;

        let mut tags = HashMap::new();
        if let Some(tagged) = rest.strip_prefix('@') {
            let (raw_tags, after) = tagged.split_once(' ').ok_or(ParseError::MissingCommand)?;
            for tag in raw_tags.split(';').filter(|t| !t.is_empty()) {
                match tag.split_once('=') {
                    Some((k, v)) => tags.insert(k.to_string(), unescape_tag_value(v)),
                    None => tags.insert(tag.to_string(), String::new()),
                };
            }
            rest = after.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (origin, after) = prefixed.split_once(' ').ok_or(ParseError::MissingCommand)?;
            prefix = Some(origin.to_string());
            rest = after.trim_start_matches(' ');
        }

        let (command, mut remaining) = match rest.split_once(' ') {
            Some((cmd, after)) => (cmd, after),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    remaining = after;
                }
                None => {
                    params.push(remaining.to_string());
                    break;
                }
            }
        }

        Ok(Self {
            tags,
            prefix,
            command: command.to_string(),
            params,
        })
    }

    /// Nickname portion of the prefix, or `""` when there is no prefix.
    pub fn source_nick(&self) -> &str {
        self.prefix.as_deref().map(nick_from_prefix).unwrap_or("")
    }

    /// Parameter at `idx`, or `""` when missing.
    pub fn param(&self, idx: usize) -> &str {
        self.params.get(idx).map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                write!(f, " {param}")?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{last}")?;
            } else {
                write!(f, " {last}")?;
            }
        }
        Ok(())
    }
}

/// `nick!user@host` → `nick`. A prefix without `!` is returned whole.
pub fn nick_from_prefix(prefix: &str) -> &str {
    prefix.split('!').next().unwrap_or(prefix)
}

/// `nick!user@host` → `(Some("user"), Some("host"))`.
pub fn user_and_host(prefix: &str) -> (Option<&str>, Option<&str>) {
    let after_nick = prefix.split_once('!').map(|(_, rest)| rest);
    match after_nick {
        Some(rest) => match rest.split_once('@') {
            Some((user, host)) => (Some(user), Some(host)),
            None => (Some(rest), None),
        },
        None => (None, prefix.split_once('@').map(|(_, host)| host)),
    }
}

/// Channel names start with `#` or `&`.
pub fn is_channel_name(name: &str) -> bool {
    name.starts_with('#') || name.starts_with('&')
}

/// Normalize a user-typed channel name for JOIN.
///
/// Status characters pasted from a member list (`@ + % ~`) are dropped, as is
/// a stray `&` in front of `#`; a bare name gets a `#`.
pub fn normalize_channel(name: &str) -> String {
    let name = name.trim().trim_start_matches(['@', '+', '%', '~']);
    let name = match name.strip_prefix('&') {
        Some(rest) if rest.starts_with('#') => rest,
        _ => name,
    };
    if is_channel_name(name) {
        name.to_string()
    } else {
        format!("#{name}")
    }
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
