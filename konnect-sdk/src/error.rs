//! SDK error types.

/// Failures surfaced by [`Client`](crate::client::Client) operations.
///
/// Transport failures during a live connection are reported as events, not
/// through this type; see [`Event::Error`](crate::event::Event::Error).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The session task has stopped; the client handle is no longer usable.
    #[error("session task has shut down")]
    SessionClosed,
}
