//! Connection lifecycle and the outbound half of the socket.
//!
//! The read half is owned by the session task. The write half lives in
//! [`Outbound`], shared between the session task and every [`Client`] handle,
//! so callers can write without waiting for inbound processing. Writes are
//! serialized by an async mutex.
//!
//! [`Client`]: crate::client::Client

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::error::Error;
use crate::framer::FrameReader;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Framed inbound half as held by the session task.
pub type Inbound = FrameReader<BufReader<BoxedReader>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Split any bidirectional stream into the halves the session uses.
pub fn split_stream<S>(stream: S) -> (BoxedReader, BoxedWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    (Box::new(reader), Box::new(writer))
}

pub async fn open_tcp(host: &str, port: u16) -> std::io::Result<(BoxedReader, BoxedWriter)> {
    tracing::debug!("Connecting to {host}:{port}...");
    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true)?;
    tracing::debug!("TCP connected to {host}:{port}");
    Ok(split_stream(tcp))
}

pub fn frame(reader: BoxedReader) -> Inbound {
    FrameReader::new(BufReader::new(reader))
}

/// Registration burst: `PASS` (when set and non-empty), `NICK`, `USER`.
pub fn registration_lines(nick: &str, realname: &str, password: Option<&str>) -> Vec<String> {
    let mut lines = Vec::with_capacity(3);
    if let Some(pass) = password.filter(|p| !p.is_empty()) {
        lines.push(format!("PASS {pass}"));
    }
    lines.push(format!("NICK {nick}"));
    lines.push(format!("USER {nick} 0 * :{realname}"));
    lines
}

pub struct Outbound {
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    state: Mutex<ConnectionState>,
    failure: Mutex<Option<String>>,
    failed: Notify,
}

impl Outbound {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            writer: tokio::sync::Mutex::new(None),
            state: Mutex::new(ConnectionState::Idle),
            failure: Mutex::new(None),
            failed: Notify::new(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Claim the connection slot. Returns `false` when a connection is
    /// already being made or is live.
    pub fn begin_connect(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing => false,
            ConnectionState::Idle | ConnectionState::Closed => {
                *state = ConnectionState::Connecting;
                true
            }
        }
    }

    /// The attempt ended without a connection: refused or cancelled.
    pub fn connect_failed(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }

    /// Install the write half and mark the connection open.
    pub async fn attach(&self, writer: BoxedWriter) {
        let mut guard = self.writer.lock().await;
        *guard = Some(writer);
        self.failure.lock().take();
        *self.state.lock() = ConnectionState::Open;
    }

    /// Write one protocol line, CR/LF appended. Anything after an embedded
    /// line break is dropped so a caller cannot smuggle a second command.
    ///
    /// A no-op unless the connection is open. A write error schedules a
    /// teardown through [`Outbound::failed`] and is returned to the caller.
    pub async fn send_raw(&self, line: &str) -> Result<(), Error> {
        let line = line.split(['\r', '\n']).next().unwrap_or_default();
        if !self.is_open() {
            tracing::debug!("not connected, dropping: {line}");
            return Ok(());
        }
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };
        tracing::trace!(">> {line}");
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!("write failed: {e}");
            self.mark_failed(format!("Write error: {e}"));
            return Err(e.into());
        }
        Ok(())
    }

    fn mark_failed(&self, reason: String) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Open {
            return;
        }
        *state = ConnectionState::Closing;
        *self.failure.lock() = Some(reason);
        self.failed.notify_one();
    }

    /// Resolves after a write failure has been recorded.
    pub async fn failed(&self) {
        self.failed.notified().await;
    }

    pub fn take_failure(&self) -> Option<String> {
        self.failure.lock().take()
    }

    /// Release the write half. With a quit message, `QUIT` is written and
    /// flushed first; failures there are ignored since the socket is going
    /// away regardless.
    pub async fn close(&self, quit: Option<&str>) {
        *self.state.lock() = ConnectionState::Closing;
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            if let Some(msg) = quit {
                tracing::trace!(">> QUIT :{msg}");
                let sent = async {
                    writer.write_all(format!("QUIT :{msg}\r\n").as_bytes()).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = sent {
                    tracing::debug!("QUIT not delivered: {e}");
                }
            }
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("shutdown: {e}");
            }
        }
        *self.state.lock() = ConnectionState::Closed;
    }
}
