//! Caller-facing client: commands in, [`Event`]s out.
//!
//! [`Client::new`] spawns one session task and returns a cloneable handle
//! plus the event receiver. The session task owns the [`Session`] and the
//! read half of the connection; it is the only code that mutates channel
//! state. Handles write protocol lines straight to the shared [`Outbound`],
//! so a send never waits behind inbound processing.
//!
//! ## Lifecycle
//!
//! A client can connect, disconnect and connect again. Each connection ends
//! with exactly one [`Event::Disconnected`], whether the caller asked for it,
//! the server closed the stream or a read or write failed. There is no
//! automatic reconnect; a consumer that wants one listens for
//! `Disconnected` and calls [`Client::connect`] again. Disconnecting while
//! a TCP connect is still pending cancels it.
//!
//! Commands issued while not connected are accepted and do nothing.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::ctcp;
use crate::directory::{Directory, DirectoryView, SharedDirectory};
use crate::error::Error;
use crate::event::{Event, LineKind};
use crate::irc::{Message, is_channel_name, normalize_channel};
use crate::model::Rank;
use crate::session::{Session, SessionSnapshot};
use crate::transport::{
    self, BoxedReader, BoxedWriter, ConnectionState, Inbound, Outbound, registration_lines,
};

/// Quit message used when the caller does not supply one.
pub const DEFAULT_QUIT_MESSAGE: &str = "KonnectChat IRC Desktop Client";

const DEFAULT_KICK_REASON: &str = "Kicked by admin";
const DEFAULT_BAN_REASON: &str = "Banned by admin";

/// Identity and session preferences. Server address is given per connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub nick: String,
    pub realname: String,
    /// Server password, sent as `PASS` when non-empty.
    pub password: Option<String>,
    /// Channel joined once the server welcomes us.
    pub auto_join: Option<String>,
    /// Channels marked favorite by the user.
    pub favorites: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nick: "KonnectUser".to_string(),
            realname: "KonnectChat User".to_string(),
            password: None,
            auto_join: None,
            favorites: Vec::new(),
        }
    }
}

enum Command {
    Connect {
        host: String,
        port: u16,
    },
    Attach {
        reader: BoxedReader,
        writer: BoxedWriter,
    },
    /// Outcome of a TCP connect started by `Connect`.
    Opened {
        attempt: u64,
        target: String,
        result: std::io::Result<(BoxedReader, BoxedWriter)>,
    },
    Disconnect {
        quit: Option<String>,
    },
    /// Local echo of an outgoing message.
    Echo {
        target: String,
        text: String,
        kind: LineKind,
    },
    ToggleFavorite {
        channel: String,
        reply: oneshot::Sender<bool>,
    },
    CloseQuery {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Handle to a session. Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    outbound: Arc<Outbound>,
    directory: SharedDirectory,
}

impl Client {
    /// Create a session and spawn its task. Must be called within a tokio
    /// runtime.
    pub fn new(config: ClientConfig) -> (Self, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(4096);
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let outbound = Outbound::new();
        let directory = Directory::shared();

        let session = Session::new(
            &config.nick,
            &config.favorites,
            config.auto_join.clone(),
            Arc::clone(&directory),
        );
        let task = SessionTask {
            session,
            config,
            outbound: Arc::clone(&outbound),
            inbound: None,
            events: event_tx,
            commands: cmd_tx.downgrade(),
            attempt: 0,
        };
        tokio::spawn(task.run(cmd_rx));

        let client = Self {
            commands: cmd_tx,
            outbound,
            directory,
        };
        (client, event_rx)
    }

    async fn command(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.outbound.state()
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_open()
    }

    /// Open a TCP connection and register. Progress and failure are reported
    /// as events ([`Event::Connected`] or an [`Event::Error`]).
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.command(Command::Connect {
            host: host.to_string(),
            port,
        })
        .await
    }

    /// Register over an already-open stream.
    pub async fn connect_with_stream<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = transport::split_stream(stream);
        self.command(Command::Attach { reader, writer }).await
    }

    /// Close the connection, sending `QUIT` first when a message is given.
    /// Safe to call repeatedly.
    pub async fn disconnect(&self, quit: Option<&str>) -> Result<()> {
        self.command(Command::Disconnect {
            quit: quit.map(str::to_string),
        })
        .await
    }

    /// Send one protocol line as-is.
    pub async fn send_raw(&self, line: &str) -> Result<()> {
        self.outbound.send_raw(line).await?;
        Ok(())
    }

    pub async fn join(&self, channel: &str) -> Result<()> {
        let channel = normalize_channel(channel);
        self.send_raw(&format!("JOIN {channel}")).await
    }

    pub async fn part(&self, channel: &str, message: Option<&str>) -> Result<()> {
        match message {
            Some(msg) => self.send_raw(&format!("PART {channel} :{msg}")).await,
            None => self.send_raw(&format!("PART {channel}")).await,
        }
    }

    /// Send a message and echo it into the local channel or query.
    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.say(target, text, &format!("PRIVMSG {target} :{text}"), LineKind::Message)
            .await
    }

    /// `/me`: a CTCP ACTION.
    pub async fn action(&self, target: &str, text: &str) -> Result<()> {
        let line = format!("PRIVMSG {target} :{}", ctcp::action(text));
        self.say(target, text, &line, LineKind::Action).await
    }

    pub async fn notice(&self, target: &str, text: &str) -> Result<()> {
        self.say(target, text, &format!("NOTICE {target} :{text}"), LineKind::Notice)
            .await
    }

    async fn say(&self, target: &str, text: &str, line: &str, kind: LineKind) -> Result<()> {
        if !self.outbound.is_open() {
            tracing::debug!("not connected, dropping message to {target}");
            return Ok(());
        }
        self.send_raw(line).await?;
        self.command(Command::Echo {
            target: target.to_string(),
            text: text.to_string(),
            kind,
        })
        .await
    }

    /// Request a new nickname. The session nick changes only once the server
    /// confirms it.
    pub async fn change_nick(&self, nick: &str) -> Result<()> {
        self.send_raw(&format!("NICK {nick}")).await
    }

    pub async fn change_topic(&self, channel: &str, topic: &str) -> Result<()> {
        self.send_raw(&format!("TOPIC {channel} :{topic}")).await
    }

    pub async fn mode(&self, target: &str, modes: &str, args: &[&str]) -> Result<()> {
        let msg = Message::new(
            "MODE",
            std::iter::once(target)
                .chain(std::iter::once(modes))
                .chain(args.iter().copied())
                .map(str::to_string)
                .collect(),
        );
        self.send_raw(&msg.to_string()).await
    }

    /// Grant (`on`) or revoke a channel rank, e.g. `+o nick`.
    pub async fn set_rank(&self, channel: &str, nick: &str, rank: Rank, on: bool) -> Result<()> {
        let Some(letter) = rank.mode_letter() else {
            tracing::debug!("rank {rank:?} has no mode letter");
            return Ok(());
        };
        let sign = if on { '+' } else { '-' };
        self.send_raw(&format!("MODE {channel} {sign}{letter} {nick}"))
            .await
    }

    pub async fn kick(&self, channel: &str, nick: &str, reason: Option<&str>) -> Result<()> {
        let reason = reason.unwrap_or(DEFAULT_KICK_REASON);
        self.send_raw(&format!("KICK {channel} {nick} :{reason}"))
            .await
    }

    /// Ban `nick!*@*` and kick them.
    pub async fn ban(&self, channel: &str, nick: &str, reason: Option<&str>) -> Result<()> {
        self.send_raw(&format!("MODE {channel} +b {nick}!*@*")).await?;
        self.kick(channel, nick, Some(reason.unwrap_or(DEFAULT_BAN_REASON)))
            .await
    }

    /// Disconnect a user from the network. Requires operator status.
    pub async fn kill(&self, nick: &str, reason: &str) -> Result<()> {
        self.send_raw(&format!("KILL {nick} :{reason}")).await
    }

    pub async fn whois(&self, nick: &str) -> Result<()> {
        self.send_raw(&format!("WHOIS {nick}")).await
    }

    /// Mark ourselves away with a message, or back with `None`.
    pub async fn set_away(&self, message: Option<&str>) -> Result<()> {
        match message {
            Some(msg) => self.send_raw(&format!("AWAY :{msg}")).await,
            None => self.send_raw("AWAY").await,
        }
    }

    /// Start a fresh LIST cycle; the directory is emptied first.
    pub async fn refresh_channel_list(&self) -> Result<()> {
        if !self.outbound.is_open() {
            tracing::debug!("not connected, skipping LIST");
            return Ok(());
        }
        self.directory.lock().clear();
        self.send_raw("LIST").await
    }

    pub fn directory_view(&self, search: &str) -> DirectoryView {
        self.directory.lock().view(search)
    }

    /// Flip a channel's favorite flag. Returns the new flag.
    pub async fn toggle_favorite(&self, channel: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::ToggleFavorite {
            channel: channel.to_string(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| Error::SessionClosed)?)
    }

    /// Close a query window. For a real channel this parts it instead.
    /// Returns whether a query was closed.
    pub async fn close_query(&self, name: &str) -> Result<bool> {
        if is_channel_name(name) {
            self.part(name, None).await?;
            return Ok(false);
        }
        let (reply, rx) = oneshot::channel();
        self.command(Command::CloseQuery {
            name: name.to_string(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| Error::SessionClosed)?)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Snapshot { reply }).await?;
        Ok(rx.await.map_err(|_| Error::SessionClosed)?)
    }
}

/// Resolves to the next inbound message, or never when there is no
/// connection.
async fn next_inbound(inbound: &mut Option<Inbound>) -> std::io::Result<Option<Message>> {
    match inbound {
        Some(reader) => reader.next_message().await,
        None => std::future::pending().await,
    }
}

struct SessionTask {
    session: Session,
    config: ClientConfig,
    outbound: Arc<Outbound>,
    /// Present exactly while a connection is live.
    inbound: Option<Inbound>,
    events: mpsc::Sender<Event>,
    /// Connect results come back through here. Weak so that dropping every
    /// `Client` still ends the task.
    commands: mpsc::WeakSender<Command>,
    /// Bumped per TCP connect; results from an older attempt are dropped.
    attempt: u64,
}

impl SessionTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let outbound = Arc::clone(&self.outbound);
        loop {
            tokio::select! {
                biased;
                _ = outbound.failed() => {
                    let reason = outbound.take_failure();
                    self.teardown(None, reason, "Write failed").await;
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.execute(cmd).await,
                    None => {
                        tracing::debug!("all client handles dropped, stopping session");
                        self.teardown(None, None, "Client dropped").await;
                        break;
                    }
                },
                inbound = next_inbound(&mut self.inbound) => self.on_inbound(inbound).await,
            }
        }
    }

    async fn emit(&mut self, event: Event) {
        let _ = self.events.send(event).await;
    }

    async fn emit_all(&mut self, events: Vec<Event>) {
        for event in events {
            self.emit(event).await;
        }
    }

    async fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { host, port } => {
                if !self.outbound.begin_connect() {
                    tracing::warn!("connect ignored: already {:?}", self.outbound.state());
                    return;
                }
                // The connect runs on its own task so snapshots and
                // disconnects are not held up by a slow handshake.
                self.attempt += 1;
                let attempt = self.attempt;
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    let result = transport::open_tcp(&host, port).await;
                    if let Some(commands) = commands.upgrade() {
                        let target = format!("{host}:{port}");
                        let _ = commands
                            .send(Command::Opened {
                                attempt,
                                target,
                                result,
                            })
                            .await;
                    }
                });
            }
            Command::Opened {
                attempt,
                target,
                result,
            } => {
                if attempt != self.attempt
                    || self.outbound.state() != ConnectionState::Connecting
                {
                    tracing::debug!("dropping abandoned connect to {target}");
                    return;
                }
                match result {
                    Ok((reader, writer)) => self.register(reader, writer).await,
                    Err(e) => {
                        tracing::warn!("connection to {target} failed: {e}");
                        self.outbound.connect_failed();
                        self.emit(Event::Error {
                            message: format!("Connection failed: {e}"),
                        })
                        .await;
                    }
                }
            }
            Command::Attach { reader, writer } => {
                if !self.outbound.begin_connect() {
                    tracing::warn!("stream ignored: already {:?}", self.outbound.state());
                    return;
                }
                self.register(reader, writer).await;
            }
            Command::Disconnect { quit } => {
                if self.inbound.is_none() && self.outbound.state() == ConnectionState::Connecting {
                    tracing::debug!("cancelling pending connect");
                    self.attempt += 1;
                    self.outbound.connect_failed();
                    self.emit(Event::Disconnected {
                        reason: "Connect cancelled".to_string(),
                    })
                    .await;
                    return;
                }
                self.teardown(quit.as_deref(), None, "Disconnected").await;
            }
            Command::Echo { target, text, kind } => {
                let events = self.session.echo(&target, &text, kind);
                self.emit_all(events).await;
            }
            Command::ToggleFavorite { channel, reply } => {
                let (favorite, event) = self.session.toggle_favorite(&channel);
                self.emit(event).await;
                let _ = reply.send(favorite);
            }
            Command::CloseQuery { name, reply } => {
                let event = self.session.close_query(&name);
                let closed = event.is_some();
                if let Some(event) = event {
                    self.emit(event).await;
                }
                let _ = reply.send(closed);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot(self.outbound.state()));
            }
        }
    }

    /// Install a fresh connection, send the registration burst and start
    /// reading.
    async fn register(&mut self, reader: BoxedReader, writer: BoxedWriter) {
        self.session.begin_connection(&self.config.nick);
        self.outbound.attach(writer).await;
        self.inbound = Some(transport::frame(reader));
        let lines = registration_lines(
            &self.config.nick,
            &self.config.realname,
            self.config.password.as_deref(),
        );
        for line in lines {
            if self.outbound.send_raw(&line).await.is_err() {
                // The failure notification finishes the teardown.
                break;
            }
        }
        tracing::debug!("registration sent as {}", self.config.nick);
        self.emit(Event::Connected).await;
    }

    async fn on_inbound(&mut self, inbound: std::io::Result<Option<Message>>) {
        let msg = match inbound {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::debug!("server closed the connection");
                self.teardown(None, None, "Connection closed").await;
                return;
            }
            Err(e) => {
                tracing::warn!("read failed: {e}");
                self.teardown(None, Some(format!("Read error: {e}")), "Connection lost")
                    .await;
                return;
            }
        };

        // Answered here, ahead of anything else, so keepalive never waits.
        if msg.command == "PING" {
            let token = msg.param(0);
            if let Err(e) = self.outbound.send_raw(&format!("PONG :{token}")).await {
                tracing::warn!("PONG failed: {e}");
            }
            return;
        }

        let events = self.session.handle(&msg);
        for line in self.session.take_replies() {
            if let Err(e) = self.outbound.send_raw(&line).await {
                tracing::warn!("reply failed: {e}");
            }
        }
        self.emit_all(events).await;
    }

    /// Release the connection once. Later calls find nothing to release and
    /// emit nothing.
    async fn teardown(&mut self, quit: Option<&str>, error: Option<String>, reason: &str) {
        if self.inbound.take().is_none() {
            tracing::debug!("teardown ignored: no live connection");
            return;
        }
        tracing::debug!("tearing down connection: {reason}");
        self.outbound.close(quit).await;
        if let Some(message) = error {
            self.emit(Event::Error { message }).await;
        }
        let closed = self.session.reset_on_disconnect();
        self.emit_all(closed).await;
        self.emit(Event::Disconnected {
            reason: reason.to_string(),
        })
        .await;
    }
}
