//! Channel MODE parsing.
//!
//! Modes are read left to right under a running sign. Which letters consume a
//! positional argument follows the common server conventions:
//!
//! - rank letters `q a o h v`: always (the affected nickname)
//! - list letters `b e I`: always (the mask)
//! - `k`: always
//! - `l`: only when adding
//! - everything else: never

use crate::model::Rank;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeChange {
    /// A rank granted or revoked on a member.
    Rank { add: bool, rank: Rank, nick: String },
    /// Ban list entry added or removed.
    Ban { add: bool, mask: String },
    /// Ban/exception/invite list query or exception list edit; nothing to track.
    List { add: bool, letter: char, mask: Option<String> },
    Key { add: bool, key: Option<String> },
    Limit { add: bool, limit: Option<u32> },
    /// Argument-less flag such as `n`, `t`, `m`, `i`, `s`.
    Flag { add: bool, letter: char },
}

/// Parse `modes` with its positional `args` into individual changes.
/// Missing arguments are tolerated: the change is reported without one,
/// or dropped when it cannot mean anything without it.
pub fn parse_channel_modes(modes: &str, args: &[String]) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    let mut args = args.iter();
    let mut add = true;

    for letter in modes.chars() {
        match letter {
            '+' => add = true,
            '-' => add = false,
            'b' => match args.next() {
                Some(mask) => changes.push(ModeChange::Ban {
                    add,
                    mask: mask.clone(),
                }),
                None => changes.push(ModeChange::List {
                    add,
                    letter,
                    mask: None,
                }),
            },
            'e' | 'I' => changes.push(ModeChange::List {
                add,
                letter,
                mask: args.next().cloned(),
            }),
            'k' => changes.push(ModeChange::Key {
                add,
                key: args.next().cloned(),
            }),
            'l' => {
                let limit = if add {
                    args.next().and_then(|a| a.parse().ok())
                } else {
                    None
                };
                changes.push(ModeChange::Limit { add, limit });
            }
            _ => match Rank::from_mode_letter(letter) {
                Some(rank) => {
                    if let Some(nick) = args.next() {
                        changes.push(ModeChange::Rank {
                            add,
                            rank,
                            nick: nick.clone(),
                        });
                    }
                }
                None => changes.push(ModeChange::Flag { add, letter }),
            },
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn each_rank_letter_takes_one_nick() {
        let changes = parse_channel_modes("+ov", &args(&["alice", "bob"]));
        assert_eq!(
            changes,
            vec![
                ModeChange::Rank { add: true, rank: Rank::Operator, nick: "alice".into() },
                ModeChange::Rank { add: true, rank: Rank::Voice, nick: "bob".into() },
            ]
        );
    }

    #[test]
    fn sign_applies_until_next_sign() {
        let changes = parse_channel_modes("+o-vh+q", &args(&["a", "b", "c", "d"]));
        let summary: Vec<(bool, Rank)> = changes
            .iter()
            .map(|c| match c {
                ModeChange::Rank { add, rank, .. } => (*add, *rank),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (true, Rank::Operator),
                (false, Rank::Voice),
                (false, Rank::HalfOp),
                (true, Rank::Owner),
            ]
        );
    }

    #[test]
    fn limit_takes_argument_only_when_adding() {
        let changes = parse_channel_modes("+l-l+o", &args(&["25", "carol"]));
        assert_eq!(
            changes,
            vec![
                ModeChange::Limit { add: true, limit: Some(25) },
                ModeChange::Limit { add: false, limit: None },
                ModeChange::Rank { add: true, rank: Rank::Operator, nick: "carol".into() },
            ]
        );
    }

    #[test]
    fn ban_and_key_always_take_arguments() {
        let changes = parse_channel_modes("-bk+nt", &args(&["*!*@spam", "secret"]));
        assert_eq!(
            changes,
            vec![
                ModeChange::Ban { add: false, mask: "*!*@spam".into() },
                ModeChange::Key { add: false, key: Some("secret".into()) },
                ModeChange::Flag { add: true, letter: 'n' },
                ModeChange::Flag { add: true, letter: 't' },
            ]
        );
    }

    #[test]
    fn ban_without_mask_is_a_list_query() {
        let changes = parse_channel_modes("+b", &[]);
        assert_eq!(changes, vec![ModeChange::List { add: true, letter: 'b', mask: None }]);
    }

    #[test]
    fn rank_without_nick_is_dropped() {
        assert!(parse_channel_modes("+o", &[]).is_empty());
    }
}
