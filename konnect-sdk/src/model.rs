//! Channel and member state.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

/// Name of the pseudo-channel that receives unrouted traffic.
pub const SERVER_CHANNEL: &str = "Server";

/// Case-folded lookup key for nicknames and channel names.
pub fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Standing of a member within a channel, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    Owner,
    Admin,
    Operator,
    HalfOp,
    Voice,
    None,
}

impl Rank {
    /// Every rank, highest first.
    pub const ALL: [Rank; 6] = [
        Rank::Owner,
        Rank::Admin,
        Rank::Operator,
        Rank::HalfOp,
        Rank::Voice,
        Rank::None,
    ];

    /// NAMES/WHO prefix character.
    pub fn prefix(self) -> Option<char> {
        match self {
            Rank::Owner => Some('~'),
            Rank::Admin => Some('&'),
            Rank::Operator => Some('@'),
            Rank::HalfOp => Some('%'),
            Rank::Voice => Some('+'),
            Rank::None => None,
        }
    }

    /// Channel mode letter that grants this rank.
    pub fn mode_letter(self) -> Option<char> {
        match self {
            Rank::Owner => Some('q'),
            Rank::Admin => Some('a'),
            Rank::Operator => Some('o'),
            Rank::HalfOp => Some('h'),
            Rank::Voice => Some('v'),
            Rank::None => None,
        }
    }

    pub fn from_prefix(c: char) -> Option<Rank> {
        Rank::ALL.into_iter().find(|r| r.prefix() == Some(c))
    }

    pub fn from_mode_letter(c: char) -> Option<Rank> {
        Rank::ALL.into_iter().find(|r| r.mode_letter() == Some(c))
    }

    /// Group heading used by member lists.
    pub fn label(self) -> &'static str {
        match self {
            Rank::Owner => "Owners",
            Rank::Admin => "Admins",
            Rank::Operator => "Operators",
            Rank::HalfOp => "Half-Ops",
            Rank::Voice => "Voice",
            Rank::None => "Users",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Member {
    pub nick: String,
    pub username: String,
    pub hostname: String,
    pub realname: String,
    pub server: String,
    pub connecting_from: String,
    /// Channels reported by the last completed WHOIS.
    pub channels: Vec<String>,
    /// Every rank prefix the member holds; several can be held at once.
    pub prefixes: BTreeSet<char>,
    pub away: bool,
    pub away_message: String,
}

impl Member {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            ..Default::default()
        }
    }

    /// Highest rank among the held prefixes.
    pub fn rank(&self) -> Rank {
        Rank::ALL
            .into_iter()
            .find(|r| r.prefix().is_some_and(|p| self.prefixes.contains(&p)))
            .unwrap_or(Rank::None)
    }

    /// Highest prefix character, if any.
    pub fn display_prefix(&self) -> Option<char> {
        self.rank().prefix()
    }

    /// `@alice`, `alice`.
    pub fn display_name(&self) -> String {
        match self.display_prefix() {
            Some(p) => format!("{p}{}", self.nick),
            None => self.nick.clone(),
        }
    }

    pub fn has_rank(&self, rank: Rank) -> bool {
        rank.prefix().is_some_and(|p| self.prefixes.contains(&p))
    }

    pub fn grant(&mut self, rank: Rank) -> bool {
        rank.prefix().is_some_and(|p| self.prefixes.insert(p))
    }

    pub fn revoke(&mut self, rank: Rank) -> bool {
        rank.prefix().is_some_and(|p| self.prefixes.remove(&p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// The "Server" pseudo-channel.
    Server,
    /// A real `#`/`&` channel.
    Channel,
    /// A one-to-one conversation keyed by the peer's nickname.
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub name: String,
    pub kind: ChannelKind,
    pub topic: Option<String>,
    /// Mode letters without arguments, e.g. `nt`.
    pub modes: String,
    pub key: Option<String>,
    pub limit: Option<u32>,
    pub bans: Vec<String>,
    pub favorite: bool,
    members: HashMap<String, Member>,
}

impl Channel {
    pub fn new(name: &str, kind: ChannelKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            topic: None,
            modes: String::new(),
            key: None,
            limit: None,
            bans: Vec::new(),
            favorite: false,
            members: HashMap::new(),
        }
    }

    /// `+nt`, or empty when no modes are known.
    pub fn mode_string(&self) -> String {
        if self.modes.is_empty() {
            String::new()
        } else {
            format!("+{}", self.modes)
        }
    }

    pub fn set_mode_letter(&mut self, letter: char, on: bool) {
        let present = self.modes.contains(letter);
        if on && !present {
            self.modes.push(letter);
        } else if !on && present {
            self.modes.retain(|c| c != letter);
        }
    }

    pub fn add_ban(&mut self, mask: &str) -> bool {
        if self.bans.iter().any(|b| b == mask) {
            return false;
        }
        self.bans.push(mask.to_string());
        true
    }

    pub fn remove_ban(&mut self, mask: &str) -> bool {
        let before = self.bans.len();
        self.bans.retain(|b| b != mask);
        self.bans.len() != before
    }

    pub fn member(&self, nick: &str) -> Option<&Member> {
        self.members.get(&fold(nick))
    }

    pub fn member_mut(&mut self, nick: &str) -> Option<&mut Member> {
        self.members.get_mut(&fold(nick))
    }

    pub fn has_member(&self, nick: &str) -> bool {
        self.members.contains_key(&fold(nick))
    }

    /// Existing member for `nick`, or a freshly inserted one.
    pub fn member_entry(&mut self, nick: &str) -> &mut Member {
        self.members
            .entry(fold(nick))
            .or_insert_with(|| Member::new(nick))
    }

    pub fn remove_member(&mut self, nick: &str) -> Option<Member> {
        self.members.remove(&fold(nick))
    }

    /// Re-key a member under its new nickname, keeping the same record.
    pub fn rename_member(&mut self, old: &str, new: &str) -> bool {
        let Some(mut member) = self.members.remove(&fold(old)) else {
            return false;
        };
        member.nick = new.to_string();
        self.members.insert(fold(new), member);
        true
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members grouped by rank (highest first), each group sorted by nickname.
    /// Empty groups are omitted. The groups borrow from the channel.
    pub fn rank_groups(&self) -> Vec<(Rank, Vec<&Member>)> {
        let mut groups: Vec<(Rank, Vec<&Member>)> =
            Rank::ALL.into_iter().map(|r| (r, Vec::new())).collect();
        for member in self.members.values() {
            let rank = member.rank();
            if let Some((_, group)) = groups.iter_mut().find(|(r, _)| *r == rank) {
                group.push(member);
            }
        }
        for (_, group) in groups.iter_mut() {
            group.sort_by_key(|m| fold(&m.nick));
        }
        groups.retain(|(_, group)| !group.is_empty());
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_follows_priority_order() {
        let mut m = Member::new("alice");
        assert_eq!(m.rank(), Rank::None);
        m.grant(Rank::Voice);
        assert_eq!(m.rank(), Rank::Voice);
        m.grant(Rank::Operator);
        assert_eq!(m.rank(), Rank::Operator);
        assert_eq!(m.display_name(), "@alice");
        m.grant(Rank::Owner);
        assert_eq!(m.display_prefix(), Some('~'));
        m.revoke(Rank::Owner);
        assert_eq!(m.rank(), Rank::Operator);
        assert!(m.has_rank(Rank::Voice));
    }

    #[test]
    fn rank_letters_and_prefixes_round_trip() {
        assert_eq!(Rank::from_mode_letter('h'), Some(Rank::HalfOp));
        assert_eq!(Rank::from_prefix('&'), Some(Rank::Admin));
        assert_eq!(Rank::from_prefix('#'), None);
        assert_eq!(Rank::from_mode_letter('b'), None);
    }

    #[test]
    fn members_are_case_insensitive() {
        let mut chan = Channel::new("#rust", ChannelKind::Channel);
        chan.member_entry("Alice").grant(Rank::Voice);
        assert!(chan.has_member("alice"));
        assert_eq!(chan.member("ALICE").map(|m| m.nick.as_str()), Some("Alice"));
        chan.member_entry("alice").grant(Rank::Operator);
        assert_eq!(chan.member_count(), 1);
        assert_eq!(chan.member("alice").map(Member::rank), Some(Rank::Operator));
    }

    #[test]
    fn rename_keeps_the_record() {
        let mut chan = Channel::new("#rust", ChannelKind::Channel);
        let m = chan.member_entry("bob");
        m.grant(Rank::HalfOp);
        m.hostname = "example.org".into();
        assert!(chan.rename_member("bob", "robert"));
        assert!(chan.member("bob").is_none());
        let renamed = chan.member("robert").unwrap();
        assert_eq!(renamed.nick, "robert");
        assert_eq!(renamed.hostname, "example.org");
        assert!(renamed.has_rank(Rank::HalfOp));
    }

    #[test]
    fn bans_are_idempotent() {
        let mut chan = Channel::new("#rust", ChannelKind::Channel);
        assert!(chan.add_ban("*!*@spam"));
        assert!(!chan.add_ban("*!*@spam"));
        assert_eq!(chan.bans.len(), 1);
        assert!(chan.remove_ban("*!*@spam"));
        assert!(!chan.remove_ban("*!*@spam"));
    }

    #[test]
    fn mode_letters_toggle() {
        let mut chan = Channel::new("#rust", ChannelKind::Channel);
        chan.set_mode_letter('n', true);
        chan.set_mode_letter('t', true);
        chan.set_mode_letter('n', true);
        assert_eq!(chan.mode_string(), "+nt");
        chan.set_mode_letter('n', false);
        assert_eq!(chan.mode_string(), "+t");
    }

    #[test]
    fn rank_groups_borrow_and_sort() {
        let mut chan = Channel::new("#rust", ChannelKind::Channel);
        chan.member_entry("zed").grant(Rank::Operator);
        chan.member_entry("amy").grant(Rank::Operator);
        chan.member_entry("bob");
        let groups = chan.rank_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Rank::Operator);
        let ops: Vec<&str> = groups[0].1.iter().map(|m| m.nick.as_str()).collect();
        assert_eq!(ops, vec!["amy", "zed"]);
        assert_eq!(groups[1].0, Rank::None);
    }
}
