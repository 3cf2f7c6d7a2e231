//! The session aggregate: self identity plus the channel table.
//!
//! A [`Session`] is owned by exactly one task. Inbound messages are applied
//! through [`Session::handle`](crate::dispatch) and every state change comes
//! back as a list of [`Event`]s, so the type itself needs no locking. The
//! channel directory is the exception; it is shared with the client handle.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::directory::SharedDirectory;
use crate::event::{ChatLine, Event, LineKind};
use crate::irc::is_channel_name;
use crate::model::{Channel, ChannelKind, SERVER_CHANNEL, fold};
use crate::transport::ConnectionState;
use crate::whois::WhoisAccumulator;

/// Point-in-time copy of the session for a consumer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub nick: String,
    pub is_oper: bool,
    pub is_away: bool,
    /// "Server" first, then channels and queries by name.
    pub channels: Vec<Channel>,
    pub favorites: Vec<String>,
}

pub struct Session {
    pub(crate) nick: String,
    pub(crate) is_oper: bool,
    pub(crate) is_away: bool,
    pub(crate) channels: HashMap<String, Channel>,
    pub(crate) whois: WhoisAccumulator,
    pub(crate) directory: SharedDirectory,
    favorites: HashSet<String>,
    auto_join: Option<String>,
    /// Lines the dispatcher wants written (auto-join); drained by the owner.
    pub(crate) replies: Vec<String>,
}

impl Session {
    pub fn new(
        nick: &str,
        favorites: &[String],
        auto_join: Option<String>,
        directory: SharedDirectory,
    ) -> Self {
        let mut channels = HashMap::new();
        channels.insert(
            fold(SERVER_CHANNEL),
            Channel::new(SERVER_CHANNEL, ChannelKind::Server),
        );
        Self {
            nick: nick.to_string(),
            is_oper: false,
            is_away: false,
            channels,
            whois: WhoisAccumulator::default(),
            directory,
            favorites: favorites.iter().map(|f| fold(f)).collect(),
            auto_join: auto_join.filter(|c| !c.trim().is_empty()),
            replies: Vec::new(),
        }
    }

    /// Current nickname. Only changes when the server confirms it.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn is_oper(&self) -> bool {
        self.is_oper
    }

    pub fn is_away(&self) -> bool {
        self.is_away
    }

    pub fn auto_join(&self) -> Option<&str> {
        self.auto_join.as_deref()
    }

    pub fn is_self(&self, nick: &str) -> bool {
        !nick.is_empty() && fold(nick) == fold(&self.nick)
    }

    pub fn is_favorite(&self, name: &str) -> bool {
        self.favorites.contains(&fold(name))
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&fold(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&fold(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn server(&self) -> Option<&Channel> {
        self.channel(SERVER_CHANNEL)
    }

    /// Drain lines queued by the dispatcher for the wire.
    pub fn take_replies(&mut self) -> Vec<String> {
        std::mem::take(&mut self.replies)
    }

    /// Logical channel for a message sent to `target` by `sender`: a message
    /// to us belongs to the sender's query, everything else to the target.
    pub fn route(&self, target: &str, sender: &str) -> String {
        if target.is_empty() {
            return SERVER_CHANNEL.to_string();
        }
        if self.is_self(target) {
            if sender.is_empty() || self.is_self(sender) {
                return SERVER_CHANNEL.to_string();
            }
            return sender.to_string();
        }
        target.to_string()
    }

    /// Existing channel named `name`, or a new channel or query. A name that
    /// is empty or is our own nickname resolves to "Server".
    pub(crate) fn open_channel(&mut self, name: &str, out: &mut Vec<Event>) -> &mut Channel {
        let name = if name.is_empty() || self.is_self(name) {
            SERVER_CHANNEL
        } else {
            name
        };
        let key = fold(name);
        let favorite = self.favorites.contains(&key);
        self.channels.entry(key).or_insert_with(|| {
            let kind = if is_channel_name(name) {
                ChannelKind::Channel
            } else {
                ChannelKind::Query
            };
            tracing::debug!("opening {name}");
            out.push(Event::ChannelOpened {
                channel: name.to_string(),
            });
            let mut channel = Channel::new(name, kind);
            channel.favorite = favorite;
            channel
        })
    }

    /// Remove a channel or query. "Server" is never removed.
    pub(crate) fn remove_channel(&mut self, name: &str, out: &mut Vec<Event>) -> Option<Channel> {
        let key = fold(name);
        if key == fold(SERVER_CHANNEL) {
            return None;
        }
        let removed = self.channels.remove(&key)?;
        out.push(Event::ChannelClosed {
            channel: removed.name.clone(),
        });
        Some(removed)
    }

    /// Emit a system line into `channel`, which must already exist.
    pub(crate) fn system(&self, channel: &str, text: impl Into<String>, out: &mut Vec<Event>) {
        let name = self
            .channel(channel)
            .map(|c| c.name.as_str())
            .unwrap_or(SERVER_CHANNEL);
        out.push(Event::Line(ChatLine::system(name, text)));
    }

    /// Local echo of something we sent.
    pub fn echo(&mut self, target: &str, text: &str, kind: LineKind) -> Vec<Event> {
        let mut out = Vec::new();
        let nick = self.nick.clone();
        let channel = self.open_channel(target, &mut out).name.clone();
        out.push(Event::Line(ChatLine::outgoing(&channel, &nick, text, kind)));
        out
    }

    /// Flip the favorite flag for `name`. Returns the new flag with its event.
    pub fn toggle_favorite(&mut self, name: &str) -> (bool, Event) {
        let key = fold(name);
        let favorite = if self.favorites.remove(&key) {
            false
        } else {
            self.favorites.insert(key.clone());
            true
        };
        if let Some(channel) = self.channels.get_mut(&key) {
            channel.favorite = favorite;
        }
        self.directory.lock().set_favorite(name, favorite);
        let event = Event::FavoriteChanged {
            channel: name.to_string(),
            favorite,
        };
        (favorite, event)
    }

    /// Close a query window. Real channels and "Server" are left alone.
    pub fn close_query(&mut self, name: &str) -> Option<Event> {
        let is_query = self
            .channel(name)
            .is_some_and(|c| c.kind == ChannelKind::Query);
        if !is_query {
            return None;
        }
        let mut out = Vec::new();
        self.remove_channel(name, &mut out);
        out.pop()
    }

    /// Prepare for a fresh registration under `nick`.
    pub fn begin_connection(&mut self, nick: &str) {
        self.nick = nick.to_string();
        self.is_oper = false;
        self.is_away = false;
        self.whois = WhoisAccumulator::default();
    }

    /// Drop every channel and query; only "Server" survives a disconnect.
    pub fn reset_on_disconnect(&mut self) -> Vec<Event> {
        let server = fold(SERVER_CHANNEL);
        let mut names: Vec<String> = self
            .channels
            .iter()
            .filter(|(key, _)| **key != server)
            .map(|(_, c)| c.name.clone())
            .collect();
        names.sort_by_key(|n| fold(n));
        let mut out = Vec::new();
        for name in names {
            self.remove_channel(&name, &mut out);
        }
        self.is_oper = false;
        self.is_away = false;
        self.whois = WhoisAccumulator::default();
        out
    }

    pub fn snapshot(&self, state: ConnectionState) -> SessionSnapshot {
        let mut channels: Vec<Channel> = self.channels.values().cloned().collect();
        channels.sort_by(|a, b| {
            let a_server = a.kind == ChannelKind::Server;
            let b_server = b.kind == ChannelKind::Server;
            b_server
                .cmp(&a_server)
                .then_with(|| fold(&a.name).cmp(&fold(&b.name)))
        });
        let mut favorites: Vec<String> = self.favorites.iter().cloned().collect();
        favorites.sort();
        SessionSnapshot {
            state,
            nick: self.nick.clone(),
            is_oper: self.is_oper,
            is_away: self.is_away,
            channels,
            favorites,
        }
    }
}
