//! IRC client session engine.
//!
//! Owns one plain-text connection to an IRC server, decodes the wire
//! protocol and keeps an in-memory model of channels, members, ranks,
//! topics, modes, bans and away state. Consumers drive it through
//! [`Client`] and observe it through [`Event`]s.

pub mod client;
pub mod ctcp;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod framer;
pub mod irc;
pub mod mode;
pub mod model;
pub mod session;
pub mod transport;
pub mod whois;

pub use client::{Client, ClientConfig, DEFAULT_QUIT_MESSAGE};
pub use event::{ChatLine, Event, LineKind};
pub use model::Rank;
pub use session::SessionSnapshot;
pub use transport::ConnectionState;
