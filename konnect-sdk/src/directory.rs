//! Channel directory built from LIST replies (322 entries, 323 end).
//!
//! The directory is filled by the session task and cleared or read by the
//! caller, so it lives behind [`SharedDirectory`].

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::irc::{Message, is_channel_name};

pub type SharedDirectory = Arc<Mutex<Directory>>;

/// One advertised channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub user_count: u32,
    pub topic: String,
    pub favorite: bool,
}

impl ChannelInfo {
    /// Parse an RPL_LIST (322) reply.
    ///
    /// Standard form is `<me> <channel> <count> :<topic>`. Some servers put an
    /// extra token before the channel; that is accepted when the fourth
    /// parameter is the numeric count instead of the third.
    pub fn from_list_reply(msg: &Message) -> Option<Self> {
        let p = &msg.params;
        if p.len() < 3 {
            return None;
        }
        let (name, user_count, topic) = if let Ok(count) = p[2].parse::<u32>() {
            (&p[1], count, p.get(3))
        } else if let Some(count) = p.get(3).and_then(|c| c.parse::<u32>().ok()) {
            (&p[2], count, p.get(4))
        } else {
            return None;
        };
        if !is_channel_name(name) {
            return None;
        }
        Some(Self {
            name: name.clone(),
            user_count,
            topic: topic.cloned().unwrap_or_default(),
            favorite: false,
        })
    }
}

/// Directory entries split by favorite flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryView {
    pub favorites: Vec<ChannelInfo>,
    pub others: Vec<ChannelInfo>,
}

#[derive(Debug, Default)]
pub struct Directory {
    entries: Vec<ChannelInfo>,
}

impl Directory {
    pub fn shared() -> SharedDirectory {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn push(&mut self, info: ChannelInfo) {
        self.entries.push(info);
    }

    /// End of LIST: order by user count, busiest first. Ties keep arrival order.
    pub fn finish(&mut self) {
        self.entries.sort_by(|a, b| b.user_count.cmp(&a.user_count));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChannelInfo] {
        &self.entries
    }

    /// Update the favorite flag on every entry named `name`.
    pub fn set_favorite(&mut self, name: &str, favorite: bool) {
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.name.eq_ignore_ascii_case(name))
        {
            entry.favorite = favorite;
        }
    }

    /// Entries whose name or topic contains `search` (case-insensitive; blank
    /// matches everything), split into favorites and others.
    pub fn view(&self, search: &str) -> DirectoryView {
        let needle = search.trim().to_lowercase();
        let mut view = DirectoryView::default();
        for entry in &self.entries {
            let matches = needle.is_empty()
                || entry.name.to_lowercase().contains(&needle)
                || entry.topic.to_lowercase().contains(&needle);
            if !matches {
                continue;
            }
            if entry.favorite {
                view.favorites.push(entry.clone());
            } else {
                view.others.push(entry.clone());
            }
        }
        view
    }
}
