//! Inbound dispatch: applies one decoded message to the [`Session`] and
//! reports every observable change as an [`Event`].
//!
//! Dispatch is synchronous and never touches the socket. Lines the session
//! wants to send in response (auto-join after welcome) are queued on the
//! session and drained by the owning task. PING never reaches this point.

use crate::ctcp;
use crate::directory::ChannelInfo;
use crate::event::{ChatLine, Event, LineKind};
use crate::irc::{Message, is_channel_name, nick_from_prefix, normalize_channel, user_and_host};
use crate::mode::{ModeChange, parse_channel_modes};
use crate::model::{ChannelKind, Rank, SERVER_CHANNEL, fold};
use crate::session::Session;
use crate::whois::{WhoisAccumulator, WhoisInfo};

fn trailing(msg: &Message) -> &str {
    msg.params.last().map(String::as_str).unwrap_or("")
}

fn with_reason(text: String, reason: &str) -> String {
    if reason.is_empty() {
        text
    } else {
        format!("{text} ({reason})")
    }
}

fn mode_summary(modes: &str, args: &[String]) -> String {
    if args.is_empty() {
        modes.to_string()
    } else {
        format!("{modes} {}", args.join(" "))
    }
}

impl Session {
    /// Apply one inbound message.
    pub fn handle(&mut self, msg: &Message) -> Vec<Event> {
        let mut out = Vec::new();
        match msg.command.as_str() {
            "PING" => {}
            "001" => self.on_welcome(msg, &mut out),
            "PRIVMSG" => self.on_privmsg(msg, &mut out),
            "NOTICE" => self.on_notice(msg, &mut out),
            "JOIN" => self.on_join(msg, &mut out),
            "PART" => self.on_part(msg, &mut out),
            "KICK" => self.on_kick(msg, &mut out),
            "QUIT" => self.on_quit(msg, &mut out),
            "KILL" => self.on_kill(msg, &mut out),
            "NICK" => self.on_nick(msg, &mut out),
            "MODE" => self.on_mode(msg, &mut out),
            "TOPIC" => self.on_topic(msg, &mut out),
            "AWAY" => self.on_away(msg, &mut out),
            // RPL_UNAWAY / RPL_NOWAWAY
            "305" | "306" => {
                self.is_away = msg.command == "306";
                out.push(Event::SelfAwayChanged { away: self.is_away });
                self.system(SERVER_CHANNEL, trailing(msg), &mut out);
            }
            // RPL_CHANNELMODEIS
            "324" => self.on_channel_modes(msg, &mut out),
            // RPL_TOPIC
            "332" => self.on_topic_reply(msg, &mut out),
            // RPL_NAMREPLY
            "353" => self.on_names(msg, &mut out),
            // RPL_BANLIST
            "367" => self.on_ban_entry(msg, &mut out),
            // RPL_YOUREOPER
            "381" => {
                self.grant_oper(&mut out);
                self.system(SERVER_CHANNEL, trailing(msg), &mut out);
            }
            // RPL_LIST / RPL_LISTEND
            "322" => self.on_list_entry(msg, &mut out),
            "323" => {
                let entries = {
                    let mut directory = self.directory.lock();
                    directory.finish();
                    directory.len()
                };
                tracing::debug!("channel list complete: {entries} entries");
                out.push(Event::DirectoryUpdated { entries });
            }
            cmd if WhoisAccumulator::handles(cmd) => self.on_whois(msg, &mut out),
            _ => self.forward(msg, &mut out),
        }
        out
    }

    /// Unrecognized traffic is shown verbatim in "Server".
    fn forward(&self, msg: &Message, out: &mut Vec<Event>) {
        out.push(Event::Line(ChatLine::incoming(
            SERVER_CHANNEL,
            msg.source_nick(),
            &msg.to_string(),
            LineKind::System,
        )));
    }

    fn grant_oper(&mut self, out: &mut Vec<Event>) {
        if !self.is_oper {
            self.is_oper = true;
            out.push(Event::OperatorGranted);
        }
    }

    fn on_welcome(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let confirmed = msg.param(0);
        if !confirmed.is_empty() {
            self.nick = confirmed.to_string();
        }
        tracing::debug!("registered as {}", self.nick);
        out.push(Event::Welcome {
            nick: self.nick.clone(),
        });
        self.system(SERVER_CHANNEL, trailing(msg), out);
        if let Some(channel) = self.auto_join().map(normalize_channel) {
            self.replies.push(format!("JOIN {channel}"));
        }
    }

    fn on_privmsg(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let sender = msg.source_nick();
        let text = msg.param(1);
        let route = self.route(msg.param(0), sender);
        let channel = self.open_channel(&route, out).name.clone();
        let line = match ctcp::parse_action(text) {
            Some(action) => ChatLine::incoming(&channel, sender, action, LineKind::Action),
            None => ChatLine::incoming(&channel, sender, text, LineKind::Message),
        };
        out.push(Event::Line(line));
    }

    /// Channel notices go to the channel, notices to us go to the sender's
    /// query when one is open, and the rest land in "Server".
    fn on_notice(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let sender = msg.source_nick();
        let target = msg.param(0);
        let channel = if is_channel_name(target) {
            self.open_channel(target, out).name.clone()
        } else if self.is_self(target)
            && let Some(query) = self
                .channel(sender)
                .filter(|c| c.kind == ChannelKind::Query)
        {
            query.name.clone()
        } else {
            SERVER_CHANNEL.to_string()
        };
        out.push(Event::Line(ChatLine::incoming(
            &channel,
            sender,
            msg.param(1),
            LineKind::Notice,
        )));
    }

    fn on_join(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let nick = msg.source_nick();
        let target = msg.param(0);
        if nick.is_empty() || target.is_empty() {
            return self.forward(msg, out);
        }
        let prefix = msg.prefix.as_deref().unwrap_or(nick);
        let mask = prefix.split_once('!').map(|(_, m)| m).unwrap_or(prefix);
        let is_self = self.is_self(nick);

        let channel = self.open_channel(target, out);
        if !is_self {
            let (user, host) = user_and_host(prefix);
            let member = channel.member_entry(nick);
            if let Some(user) = user {
                member.username = user.to_string();
            }
            if let Some(host) = host {
                member.hostname = host.to_string();
            }
        }
        let name = channel.name.clone();
        if !is_self {
            out.push(Event::MembersChanged {
                channel: name.clone(),
            });
        }
        out.push(Event::Line(ChatLine::system(
            &name,
            format!("* {nick} ({mask}) has joined {name}"),
        )));
    }

    fn on_part(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let nick = msg.source_nick();
        let target = msg.param(0);
        let reason = msg.param(1);

        if self.is_self(nick) {
            if let Some(removed) = self.remove_channel(target, out) {
                let text = with_reason(format!("* {nick} left {}", removed.name), reason);
                self.system(SERVER_CHANNEL, text, out);
            }
            return;
        }

        let Some(channel) = self.channel_mut(target) else {
            return;
        };
        let removed = channel.remove_member(nick).is_some();
        let name = channel.name.clone();
        if removed {
            out.push(Event::MembersChanged {
                channel: name.clone(),
            });
        }
        let text = with_reason(format!("* {nick} left {name}"), reason);
        out.push(Event::Line(ChatLine::system(&name, text)));
    }

    fn on_kick(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let by = msg.source_nick();
        let target = msg.param(0);
        let victim = msg.param(1);
        let reason = msg.param(2);

        if self.is_self(victim) {
            if let Some(removed) = self.remove_channel(target, out) {
                let text = with_reason(
                    format!("* You were kicked from {} by {by}", removed.name),
                    reason,
                );
                self.system(SERVER_CHANNEL, text, out);
            }
            return;
        }

        let Some(channel) = self.channel_mut(target) else {
            return;
        };
        let removed = channel.remove_member(victim).is_some();
        let name = channel.name.clone();
        if removed {
            out.push(Event::MembersChanged {
                channel: name.clone(),
            });
        }
        let text = with_reason(format!("* {victim} was kicked by {by}"), reason);
        out.push(Event::Line(ChatLine::system(&name, text)));
    }

    /// Remove `nick` from every channel in one pass and log `text` wherever
    /// they were seen, including an open query with them.
    fn drop_everywhere(&mut self, nick: &str, text: &str, out: &mut Vec<Event>) {
        let mut touched: Vec<String> = self
            .channels
            .values_mut()
            .filter_map(|channel| {
                channel
                    .remove_member(nick)
                    .map(|_| channel.name.clone())
            })
            .collect();
        touched.sort_by_key(|name| fold(name));
        for name in touched {
            out.push(Event::MembersChanged {
                channel: name.clone(),
            });
            out.push(Event::Line(ChatLine::system(&name, text)));
        }
        if let Some(query) = self
            .channel(nick)
            .filter(|c| c.kind == ChannelKind::Query)
        {
            out.push(Event::Line(ChatLine::system(&query.name, text)));
        }
    }

    fn on_quit(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let nick = msg.source_nick();
        if nick.is_empty() || self.is_self(nick) {
            return;
        }
        let text = with_reason(format!("* {nick} has quit"), msg.param(0));
        self.drop_everywhere(nick, &text, out);
    }

    fn on_kill(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let victim = msg.param(0);
        if victim.is_empty() {
            return self.forward(msg, out);
        }
        let text = with_reason(format!("* {victim} was killed"), msg.param(1));
        if self.is_self(victim) {
            self.system(SERVER_CHANNEL, text, out);
            return;
        }
        self.drop_everywhere(victim, &text, out);
    }

    /// A rename moves the same member record to its new key in every channel
    /// and carries an open query along with it.
    fn on_nick(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let old = msg.source_nick();
        let new = msg.param(0);
        if old.is_empty() || new.is_empty() {
            return self.forward(msg, out);
        }
        let is_self = self.is_self(old);
        if is_self {
            self.nick = new.to_string();
        }
        let text = format!("* {old} is now known as {new}");

        let mut touched: Vec<String> = self
            .channels
            .values_mut()
            .filter_map(|channel| {
                channel
                    .rename_member(old, new)
                    .then(|| channel.name.clone())
            })
            .collect();
        touched.sort_by_key(|name| fold(name));
        for name in touched {
            out.push(Event::MembersChanged {
                channel: name.clone(),
            });
            out.push(Event::Line(ChatLine::system(&name, &text)));
        }

        let (old_key, new_key) = (fold(old), fold(new));
        let rekey = !is_self
            && self
                .channels
                .get(&old_key)
                .is_some_and(|c| c.kind == ChannelKind::Query)
            && (old_key == new_key || !self.channels.contains_key(&new_key));
        if rekey && let Some(mut query) = self.channels.remove(&old_key) {
            query.name = new.to_string();
            self.channels.insert(new_key, query);
            out.push(Event::ChannelRenamed {
                old: old.to_string(),
                new: new.to_string(),
            });
            out.push(Event::Line(ChatLine::system(new, &text)));
        }

        if is_self {
            self.system(SERVER_CHANNEL, &text, out);
        }
        out.push(Event::NickChanged {
            old_nick: old.to_string(),
            new_nick: new.to_string(),
            is_self,
        });
    }

    fn on_mode(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let setter = msg.source_nick();
        let target = msg.param(0);
        let modes = msg.param(1);
        let args: Vec<String> = msg.params.iter().skip(2).cloned().collect();
        let text = format!("* {setter} sets mode {}", mode_summary(modes, &args));

        // User modes on ourselves: operator status is only ever granted here.
        // Servers drop it by disconnecting us, so `-o` is not tracked.
        if self.is_self(target) {
            let mut add = true;
            let mut granted = false;
            for letter in modes.chars() {
                match letter {
                    '+' => add = true,
                    '-' => add = false,
                    'o' if add => granted = true,
                    _ => {}
                }
            }
            if granted {
                self.grant_oper(out);
            }
            self.system(SERVER_CHANNEL, text, out);
            return;
        }

        let Some(channel) = self.channel_mut(target) else {
            return self.forward(msg, out);
        };
        let mut members_changed = false;
        for change in parse_channel_modes(modes, &args) {
            match change {
                ModeChange::Rank { add, rank, nick } => {
                    // Only members we have seen via JOIN or NAMES carry ranks.
                    let Some(member) = channel.member_mut(&nick) else {
                        tracing::debug!("mode {rank:?} for {nick}, not in {}", channel.name);
                        continue;
                    };
                    members_changed |= if add {
                        member.grant(rank)
                    } else {
                        member.revoke(rank)
                    };
                }
                ModeChange::Ban { add: true, mask } => {
                    channel.add_ban(&mask);
                }
                ModeChange::Ban { add: false, mask } => {
                    channel.remove_ban(&mask);
                }
                ModeChange::Key { add, key } => {
                    channel.set_mode_letter('k', add);
                    channel.key = if add { key } else { None };
                }
                ModeChange::Limit { add, limit } => {
                    channel.set_mode_letter('l', add);
                    channel.limit = if add { limit } else { None };
                }
                ModeChange::Flag { add, letter } => channel.set_mode_letter(letter, add),
                ModeChange::List { .. } => {}
            }
        }
        let name = channel.name.clone();
        if members_changed {
            out.push(Event::MembersChanged {
                channel: name.clone(),
            });
        }
        out.push(Event::Line(ChatLine::system(&name, text)));
        out.push(Event::ModeChanged {
            channel: name,
            modes: modes.to_string(),
            args,
            set_by: setter.to_string(),
        });
    }

    /// 324 reports the complete mode set, so it replaces what we had.
    fn on_channel_modes(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let modes = msg.param(2);
        let args: Vec<String> = msg.params.iter().skip(3).cloned().collect();
        let Some(channel) = self.channel_mut(msg.param(1)) else {
            return self.forward(msg, out);
        };
        channel.modes.clear();
        channel.key = None;
        channel.limit = None;
        for change in parse_channel_modes(modes, &args) {
            match change {
                ModeChange::Flag { add: true, letter } => channel.set_mode_letter(letter, true),
                ModeChange::Key { add: true, key } => {
                    channel.set_mode_letter('k', true);
                    channel.key = key;
                }
                ModeChange::Limit { add: true, limit } => {
                    channel.set_mode_letter('l', true);
                    channel.limit = limit;
                }
                _ => {}
            }
        }
        let name = channel.name.clone();
        let text = format!("* {name} modes: {}", mode_summary(modes, &args));
        out.push(Event::Line(ChatLine::system(&name, text)));
        out.push(Event::ModeChanged {
            channel: name,
            modes: modes.to_string(),
            args,
            set_by: msg.source_nick().to_string(),
        });
    }

    fn on_topic(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let setter = msg.source_nick();
        let topic = msg.param(1);
        let Some(channel) = self.channel_mut(msg.param(0)) else {
            return self.forward(msg, out);
        };
        channel.topic = Some(topic.to_string());
        let name = channel.name.clone();
        out.push(Event::Line(ChatLine::system(
            &name,
            format!("* {setter} changed the topic to: {topic}"),
        )));
        out.push(Event::TopicChanged {
            channel: name,
            topic: topic.to_string(),
            set_by: Some(setter.to_string()),
        });
    }

    // :srv 332 <me> <channel> :<topic>
    fn on_topic_reply(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let target = msg.param(1);
        let topic = msg.param(2);
        if !is_channel_name(target) {
            return self.forward(msg, out);
        }
        let channel = self.open_channel(target, out);
        channel.topic = Some(topic.to_string());
        let name = channel.name.clone();
        out.push(Event::Line(ChatLine::system(
            &name,
            format!("* Topic for {name}: {topic}"),
        )));
        out.push(Event::TopicChanged {
            channel: name,
            topic: topic.to_string(),
            set_by: None,
        });
    }

    // :srv 353 <me> <symbol> <channel> :[prefixes]<nick>[!user@host] ...
    // Some servers leave out the symbol, so the channel is read from the end.
    fn on_names(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let n = msg.params.len();
        if n < 3 {
            return self.forward(msg, out);
        }
        let target = &msg.params[n - 2];
        let names = &msg.params[n - 1];
        if !is_channel_name(target) {
            return self.forward(msg, out);
        }

        let channel = self.open_channel(target, out);
        for token in names.split_whitespace() {
            let bare = token.trim_start_matches(|c: char| Rank::from_prefix(c).is_some());
            let nick = nick_from_prefix(bare);
            if nick.is_empty() {
                continue;
            }
            let ranks = token[..token.len() - bare.len()]
                .chars()
                .filter_map(Rank::from_prefix);
            let member = channel.member_entry(nick);
            for rank in ranks {
                member.grant(rank);
            }
            if let (Some(user), Some(host)) = user_and_host(bare) {
                member.username = user.to_string();
                member.hostname = host.to_string();
            }
        }
        out.push(Event::MembersChanged {
            channel: channel.name.clone(),
        });
    }

    // :srv 367 <me> <channel> <mask> [<setter> <time>]
    fn on_ban_entry(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let mask = msg.param(2);
        let Some(channel) = self.channel_mut(msg.param(1)) else {
            return self.forward(msg, out);
        };
        if !mask.is_empty() && channel.add_ban(mask) {
            let name = channel.name.clone();
            out.push(Event::Line(ChatLine::system(&name, format!("* Ban: {mask}"))));
        }
    }

    fn on_away(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let nick = msg.source_nick();
        let message = msg.params.first().map(String::as_str);
        if self.is_self(nick) {
            self.is_away = message.is_some();
            out.push(Event::SelfAwayChanged {
                away: self.is_away,
            });
            return;
        }
        self.set_peer_away(nick, message, out);
    }

    /// Update the away state on every member record for `nick`.
    fn set_peer_away(&mut self, nick: &str, message: Option<&str>, out: &mut Vec<Event>) {
        for channel in self.channels.values_mut() {
            if let Some(member) = channel.member_mut(nick) {
                member.away = message.is_some();
                member.away_message = message.unwrap_or_default().to_string();
            }
        }
        out.push(Event::AwayChanged {
            nick: nick.to_string(),
            away_message: message.map(str::to_string),
        });
    }

    fn on_whois(&mut self, msg: &Message, out: &mut Vec<Event>) {
        // RPL_AWAY also answers a PRIVMSG to an away user, not just WHOIS.
        if msg.command == "301" {
            let nick = msg.param(1);
            let message = msg.param(2);
            self.set_peer_away(nick, Some(message), out);
            if let Some(query) = self
                .channel(nick)
                .filter(|c| c.kind == ChannelKind::Query)
            {
                out.push(Event::Line(ChatLine::system(
                    &query.name,
                    format!("* {nick} is away: {message}"),
                )));
            }
        }
        // Replies outside a WHOIS run are still shown, just not merged.
        if !matches!(msg.command.as_str(), "311" | "301") && !self.whois.is_open() {
            return self.forward(msg, out);
        }
        if let Some(info) = self.whois.feed(msg) {
            tracing::debug!("whois complete for {}", info.nick);
            self.apply_whois(&info, out);
            out.push(Event::WhoisReceived(info));
        }
    }

    /// Copy identity details from a finished WHOIS onto every member record.
    fn apply_whois(&mut self, info: &WhoisInfo, out: &mut Vec<Event>) {
        let mut touched = Vec::new();
        for channel in self.channels.values_mut() {
            let Some(member) = channel.member_mut(&info.nick) else {
                continue;
            };
            member.username = info.username.clone();
            member.hostname = info.hostname.clone();
            member.realname = info.realname.clone();
            member.server = info.server.clone();
            member.connecting_from = info.connecting_from.clone();
            member.channels = info.channels.clone();
            touched.push(channel.name.clone());
        }
        touched.sort_by_key(|name| fold(name));
        out.extend(
            touched
                .into_iter()
                .map(|channel| Event::MembersChanged { channel }),
        );
    }

    fn on_list_entry(&mut self, msg: &Message, out: &mut Vec<Event>) {
        let Some(mut info) = ChannelInfo::from_list_reply(msg) else {
            tracing::trace!("ignoring list entry: {msg}");
            return;
        };
        info.favorite = self.is_favorite(&info.name);
        self.directory.lock().push(info.clone());
        out.push(Event::ChannelFound(info));
    }
}
