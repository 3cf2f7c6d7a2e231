//! Parse a line typed at the prompt into an [`Action`].

use konnect_sdk::Rank;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Plain text for the current window.
    Say(String),
    Me(String),
    Msg { target: String, text: String },
    Notice { target: String, text: String },
    Join(String),
    /// Part a channel; the current window when none is named.
    Part { channel: Option<String>, message: Option<String> },
    Quit(Option<String>),
    Nick(String),
    Topic(String),
    Whois(String),
    /// Refresh the channel directory from the server.
    List,
    /// Show the directory, optionally filtered.
    Channels(String),
    Away(Option<String>),
    Fav(Option<String>),
    /// Switch the current window.
    Window(String),
    /// Close a query (or part a channel); the current window when none is named.
    Close(Option<String>),
    Rank { nick: String, rank: Rank, on: bool },
    Kick { nick: String, reason: Option<String> },
    Ban { nick: String, reason: Option<String> },
    Kill { nick: String, reason: String },
    Mode { target: String, modes: String, args: Vec<String> },
    Names,
    Help,
    /// Sent to the server verbatim.
    Raw(String),
    /// A command missing its required argument.
    Usage(&'static str),
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(' ') {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (text, ""),
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// `None` for a blank line. `//text` sends `/text` literally.
pub fn parse(line: &str) -> Option<Action> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let Some(command_line) = line.strip_prefix('/') else {
        return Some(Action::Say(line.to_string()));
    };
    if command_line.starts_with('/') {
        return Some(Action::Say(command_line.to_string()));
    }

    let (command, rest) = split_word(command_line);
    let (first, tail) = split_word(rest);
    let action = match command.to_ascii_lowercase().as_str() {
        "me" => match non_empty(rest) {
            Some(text) => Action::Me(text),
            None => Action::Usage("/me <action>"),
        },
        "msg" | "query" if !first.is_empty() && !tail.is_empty() => Action::Msg {
            target: first.to_string(),
            text: tail.to_string(),
        },
        "msg" => Action::Usage("/msg <target> <text>"),
        "query" | "window" | "w" => match non_empty(first) {
            Some(name) => Action::Window(name),
            None => Action::Usage("/window <name>"),
        },
        "notice" if !first.is_empty() && !tail.is_empty() => Action::Notice {
            target: first.to_string(),
            text: tail.to_string(),
        },
        "notice" => Action::Usage("/notice <target> <text>"),
        "join" | "j" => match non_empty(first) {
            Some(channel) => Action::Join(channel),
            None => Action::Usage("/join <channel>"),
        },
        "part" | "leave" => {
            if first.starts_with(['#', '&']) {
                Action::Part {
                    channel: Some(first.to_string()),
                    message: non_empty(tail),
                }
            } else {
                Action::Part {
                    channel: None,
                    message: non_empty(rest),
                }
            }
        }
        "quit" | "exit" => Action::Quit(non_empty(rest)),
        "nick" => match non_empty(first) {
            Some(nick) => Action::Nick(nick),
            None => Action::Usage("/nick <nickname>"),
        },
        "topic" => match non_empty(rest) {
            Some(topic) => Action::Topic(topic),
            None => Action::Usage("/topic <text>"),
        },
        "whois" => match non_empty(first) {
            Some(nick) => Action::Whois(nick),
            None => Action::Usage("/whois <nick>"),
        },
        "list" => Action::List,
        "channels" => Action::Channels(rest.trim().to_string()),
        "away" => Action::Away(non_empty(rest)),
        "back" => Action::Away(None),
        "fav" => Action::Fav(non_empty(first)),
        "close" => Action::Close(non_empty(first)),
        "op" | "deop" | "voice" | "devoice" | "halfop" | "dehalfop" => {
            let Some(nick) = non_empty(first) else {
                return Some(Action::Usage("/op|/deop|/voice|/devoice <nick>"));
            };
            let command = command.to_ascii_lowercase();
            let on = !command.starts_with("de");
            let rank = match command.trim_start_matches("de") {
                "op" => Rank::Operator,
                "voice" => Rank::Voice,
                _ => Rank::HalfOp,
            };
            Action::Rank { nick, rank, on }
        }
        "kick" => match non_empty(first) {
            Some(nick) => Action::Kick {
                nick,
                reason: non_empty(tail),
            },
            None => Action::Usage("/kick <nick> [reason]"),
        },
        "ban" => match non_empty(first) {
            Some(nick) => Action::Ban {
                nick,
                reason: non_empty(tail),
            },
            None => Action::Usage("/ban <nick> [reason]"),
        },
        "kill" if !first.is_empty() => Action::Kill {
            nick: first.to_string(),
            reason: non_empty(tail).unwrap_or_else(|| "Killed".to_string()),
        },
        "kill" => Action::Usage("/kill <nick> [reason]"),
        "mode" if !first.is_empty() && !tail.is_empty() => {
            let (modes, args) = split_word(tail);
            Action::Mode {
                target: first.to_string(),
                modes: modes.to_string(),
                args: args.split_whitespace().map(str::to_string).collect(),
            }
        }
        "mode" => Action::Usage("/mode <target> <modes> [args]"),
        "names" => Action::Names,
        "help" => Action::Help,
        "quote" | "raw" => match non_empty(rest) {
            Some(line) => Action::Raw(line),
            None => Action::Usage("/quote <line>"),
        },
        _ => {
            let command = command.to_ascii_uppercase();
            if rest.is_empty() {
                Action::Raw(command)
            } else {
                Action::Raw(format!("{command} {rest}"))
            }
        }
    };
    Some(action)
}

pub const HELP: &str = "\
/join <chan>  /part [chan] [msg]  /msg <nick> <text>  /me <action>  /notice <target> <text>
/window <name>  /close [name]  /nick <nick>  /topic <text>  /whois <nick>  /away [msg]  /back
/list  /channels [search]  /fav [chan]  /names
/op /deop /voice /devoice /halfop /dehalfop <nick>  /kick <nick> [reason]  /ban <nick> [reason]
/kill <nick> [reason]  /mode <target> <modes> [args]  /quote <line>  /quit [msg]";
