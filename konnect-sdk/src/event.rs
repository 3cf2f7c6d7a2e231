//! Events emitted by the session engine for the consumer (UI, bot, CLI).
//!
//! Events serialize as `{"type": "...", "data": {...}}` so a consumer in
//! another process or language can switch on `type`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::directory::ChannelInfo;
use crate::whois::WhoisInfo;

/// How a chat line should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Ordinary PRIVMSG text.
    Message,
    /// CTCP ACTION (`/me`), unwrapped.
    Action,
    Notice,
    /// Engine-generated or unrecognized server traffic.
    System,
}

/// A decoded line, already routed to the channel (or query, or "Server")
/// it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatLine {
    pub channel: String,
    pub sender: String,
    pub text: String,
    pub kind: LineKind,
    /// Sent by us rather than received.
    pub outgoing: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatLine {
    pub fn incoming(channel: &str, sender: &str, text: &str, kind: LineKind) -> Self {
        Self {
            channel: channel.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            kind,
            outgoing: false,
            timestamp: Utc::now(),
        }
    }

    pub fn system(channel: &str, text: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            sender: String::new(),
            text: text.into(),
            kind: LineKind::System,
            outgoing: false,
            timestamp: Utc::now(),
        }
    }

    pub fn outgoing(channel: &str, sender: &str, text: &str, kind: LineKind) -> Self {
        Self {
            outgoing: true,
            ..Self::incoming(channel, sender, text, kind)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Socket open and registration lines sent.
    Connected,

    /// RPL_WELCOME (001). `nick` is the nickname the server confirmed.
    Welcome {
        nick: String,
    },

    /// A message for display.
    Line(ChatLine),

    /// A channel or query entered the channel table.
    ChannelOpened {
        channel: String,
    },

    /// A channel or query left the channel table.
    ChannelClosed {
        channel: String,
    },

    /// A query followed its peer's nickname change.
    ChannelRenamed {
        old: String,
        new: String,
    },

    /// Membership or member ranks of a channel changed.
    MembersChanged {
        channel: String,
    },

    TopicChanged {
        channel: String,
        topic: String,
        set_by: Option<String>,
    },

    ModeChanged {
        channel: String,
        modes: String,
        args: Vec<String>,
        set_by: String,
    },

    NickChanged {
        old_nick: String,
        new_nick: String,
        /// The renamed nickname was ours.
        is_self: bool,
    },

    /// A peer's away state. `away_message` is `None` when they came back.
    AwayChanged {
        nick: String,
        away_message: Option<String>,
    },

    /// Our own away state (305/306).
    SelfAwayChanged {
        away: bool,
    },

    /// We became an IRC operator (381 or user MODE +o).
    OperatorGranted,

    /// One LIST (322) entry.
    ChannelFound(ChannelInfo),

    /// LIST finished (323); the directory is sorted and ready for display.
    DirectoryUpdated {
        entries: usize,
    },

    FavoriteChanged {
        channel: String,
        favorite: bool,
    },

    WhoisReceived(WhoisInfo),

    Error {
        message: String,
    },

    /// The connection is gone. Emitted once per connection.
    Disconnected {
        reason: String,
    },
}

impl Event {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
