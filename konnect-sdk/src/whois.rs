//! WHOIS aggregation.
//!
//! A WHOIS answer arrives as a run of numerics in no guaranteed order except
//! that 318 (end of WHOIS) is last. 311 opens a record, the others merge into
//! the open record, and 318 hands the finished record out and clears the slot.
//! There is only one slot: a new 311 discards whatever was still open.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::irc::Message;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WhoisInfo {
    pub nick: String,
    pub username: String,
    pub hostname: String,
    pub realname: String,
    pub server: String,
    pub server_info: String,
    pub connecting_from: String,
    pub channels: Vec<String>,
    pub is_operator: bool,
    pub idle_seconds: Option<u64>,
    pub signon: Option<DateTime<Utc>>,
    pub is_away: bool,
    pub away_message: String,
}

#[derive(Debug, Default)]
pub struct WhoisAccumulator {
    current: Option<WhoisInfo>,
}

impl WhoisAccumulator {
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Whether `command` is one of the numerics this accumulator consumes.
    pub fn handles(command: &str) -> bool {
        matches!(
            command,
            "311" | "312" | "313" | "317" | "318" | "319" | "378" | "301"
        )
    }

    /// Feed one message. Returns the completed record on 318.
    pub fn feed(&mut self, msg: &Message) -> Option<WhoisInfo> {
        let p = &msg.params;
        match msg.command.as_str() {
            // RPL_WHOISUSER: <me> <nick> <user> <host> * :<realname>
            "311" if p.len() >= 6 => {
                if let Some(stale) = self.current.take() {
                    tracing::debug!("discarding incomplete whois for {}", stale.nick);
                }
                self.current = Some(WhoisInfo {
                    nick: p[1].clone(),
                    username: p[2].clone(),
                    hostname: p[3].clone(),
                    realname: p[5].clone(),
                    ..Default::default()
                });
                None
            }
            // RPL_WHOISSERVER: <me> <nick> <server> :<server info>
            "312" if p.len() >= 3 => {
                if let Some(w) = self.current.as_mut() {
                    w.server = p[2].clone();
                    if let Some(info) = p.get(3) {
                        w.server_info = info.clone();
                    }
                }
                None
            }
            // RPL_WHOISHOST: <me> <nick> :is connecting from <user>@<host> <ip>
            "378" if p.len() >= 3 => {
                if let Some(w) = self.current.as_mut() {
                    w.connecting_from = strip_connecting_from(&p[2]).to_string();
                }
                None
            }
            // RPL_WHOISCHANNELS: <me> <nick> :<chan> <chan> ...
            "319" if p.len() >= 3 => {
                if let Some(w) = self.current.as_mut() {
                    let list = p.last().map(String::as_str).unwrap_or("");
                    w.channels.extend(list.split_whitespace().map(str::to_string));
                }
                None
            }
            // RPL_WHOISOPERATOR
            "313" => {
                if let Some(w) = self.current.as_mut() {
                    w.is_operator = true;
                }
                None
            }
            // RPL_WHOISIDLE: <me> <nick> <idle secs> <signon unix> :seconds idle, signon time
            "317" if p.len() >= 4 => {
                if let Some(w) = self.current.as_mut() {
                    if let Ok(idle) = p[2].parse() {
                        w.idle_seconds = Some(idle);
                    }
                    if let Ok(signon) = p[3].parse::<i64>() {
                        w.signon = DateTime::from_timestamp(signon, 0);
                    }
                }
                None
            }
            // RPL_AWAY: <me> <nick> :<message>
            "301" if p.len() >= 3 => {
                if let Some(w) = self.current.as_mut() {
                    w.is_away = true;
                    w.away_message = p[2].clone();
                }
                None
            }
            // RPL_ENDOFWHOIS
            "318" => self.current.take(),
            _ => None,
        }
    }
}

fn strip_connecting_from(text: &str) -> &str {
    const LEAD: &str = "is connecting from ";
    match text.get(..LEAD.len()) {
        Some(head) if head.eq_ignore_ascii_case(LEAD) => &text[LEAD.len()..],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(line: &str) -> Message {
        Message::parse(line).unwrap()
    }

    #[test]
    fn user_channels_end_yields_one_record() {
        let mut acc = WhoisAccumulator::default();
        assert!(acc.feed(&msg(":srv 311 me bob bobby host.example * :Bob Builder")).is_none());
        assert!(acc.feed(&msg(":srv 319 me bob :#a #b")).is_none());
        let info = acc.feed(&msg(":srv 318 me bob :End of /WHOIS list.")).unwrap();
        assert_eq!(info.nick, "bob");
        assert_eq!(info.username, "bobby");
        assert_eq!(info.hostname, "host.example");
        assert_eq!(info.realname, "Bob Builder");
        assert_eq!(info.channels, vec!["#a", "#b"]);
        assert!(!acc.is_open());
    }

    #[test]
    fn end_without_open_record_is_a_no_op() {
        let mut acc = WhoisAccumulator::default();
        assert!(acc.feed(&msg(":srv 318 me bob :End of /WHOIS list.")).is_none());
    }

    #[test]
    fn replies_before_the_opening_reply_are_ignored() {
        let mut acc = WhoisAccumulator::default();
        acc.feed(&msg(":srv 313 me bob :is an IRC operator"));
        acc.feed(&msg(":srv 311 me bob u h * :Bob"));
        let info = acc.feed(&msg(":srv 318 me bob :End")).unwrap();
        assert!(!info.is_operator);
    }

    #[test]
    fn merges_every_detail_in_any_order() {
        let mut acc = WhoisAccumulator::default();
        acc.feed(&msg(":srv 311 me bob u h * :Bob"));
        acc.feed(&msg(":srv 317 me bob 42 1700000000 :seconds idle, signon time"));
        acc.feed(&msg(":srv 301 me bob :gone fishing"));
        acc.feed(&msg(":srv 378 me bob :is connecting from *@10.0.0.1 10.0.0.1"));
        acc.feed(&msg(":srv 313 me bob :is an IRC operator"));
        acc.feed(&msg(":srv 312 me bob irc.example.net :Example server"));
        let info = acc.feed(&msg(":srv 318 me bob :End")).unwrap();
        assert_eq!(info.idle_seconds, Some(42));
        assert_eq!(info.signon.map(|t| t.timestamp()), Some(1_700_000_000));
        assert!(info.is_away);
        assert_eq!(info.away_message, "gone fishing");
        assert_eq!(info.connecting_from, "*@10.0.0.1 10.0.0.1");
        assert!(info.is_operator);
        assert_eq!(info.server, "irc.example.net");
        assert_eq!(info.server_info, "Example server");
    }

    #[test]
    fn new_opening_reply_discards_incomplete_record() {
        let mut acc = WhoisAccumulator::default();
        acc.feed(&msg(":srv 311 me alice u h * :Alice"));
        acc.feed(&msg(":srv 319 me alice :#old"));
        acc.feed(&msg(":srv 311 me bob u h * :Bob"));
        assert!(acc.is_open());
        let info = acc.feed(&msg(":srv 318 me bob :End")).unwrap();
        assert_eq!(info.nick, "bob");
        assert!(info.channels.is_empty());
    }
}
