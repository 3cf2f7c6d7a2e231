//! CTCP helpers. Only ACTION (`/me`) is interpreted; other CTCP bodies pass
//! through as literal text.

const DELIM: char = '\x01';

/// Unwrap `\x01ACTION text\x01` into `text`. The closing delimiter is optional
/// since some clients omit it.
pub fn parse_action(text: &str) -> Option<&str> {
    let body = text.strip_prefix(DELIM)?;
    let body = body.strip_suffix(DELIM).unwrap_or(body);
    let (command, rest) = match body.split_once(' ') {
        Some((command, rest)) => (command, rest),
        None => (body, ""),
    };
    command.eq_ignore_ascii_case("ACTION").then_some(rest)
}

/// Wrap `text` as a CTCP ACTION body.
pub fn action(text: &str) -> String {
    format!("{DELIM}ACTION {text}{DELIM}")
}
