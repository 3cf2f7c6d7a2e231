//! End-to-end session tests against a scripted server on an in-memory stream.
//!
//! Tests cover:
//! - Registration order (PASS, NICK, USER)
//! - PING answered inline and never surfaced as an event
//! - Query routing for private messages and local echo
//! - Auto-join after welcome
//! - Disconnect idempotence and stream closure by the server
//! - Read and write failures tearing the connection down once
//! - Commands issued while disconnected or while a connect is pending

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use konnect_sdk::{Client, ClientConfig, ConnectionState, Event, LineKind};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadBuf,
    ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct FakeServer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    async fn recv(&mut self) -> Option<String> {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for client line")
            .unwrap()
    }

    async fn expect(&mut self) -> String {
        self.recv().await.expect("client closed the stream")
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }
}

/// In-memory stream whose reads or writes can be made to fail.
struct FlakyStream {
    inner: DuplexStream,
    fail_reads: bool,
    fail_writes: Arc<AtomicBool>,
}

fn reset() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "reset")
}

impl AsyncRead for FlakyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fail_reads {
            return Poll::Ready(Err(reset()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FlakyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(reset()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Attach a client to a [`FlakyStream`]. The returned duplex end must be
/// kept alive for writes to succeed.
async fn flaky(
    fail_reads: bool,
) -> (Client, mpsc::Receiver<Event>, Arc<AtomicBool>, DuplexStream) {
    let (client, mut events) = Client::new(config("neo"));
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let fail_writes = Arc::new(AtomicBool::new(false));
    let stream = FlakyStream {
        inner: ours,
        fail_reads,
        fail_writes: Arc::clone(&fail_writes),
    };
    client.connect_with_stream(stream).await.unwrap();
    assert_eq!(next_event(&mut events).await, Event::Connected);
    (client, events, fail_writes, theirs)
}

fn config(nick: &str) -> ClientConfig {
    ClientConfig {
        nick: nick.into(),
        realname: "Test User".into(),
        ..Default::default()
    }
}

async fn next_event(events: &mut mpsc::Receiver<Event>) -> Event {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

async fn wait_for(events: &mut mpsc::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Connect a client to a fresh fake server and consume the registration burst.
async fn connected(config: ClientConfig) -> (Client, mpsc::Receiver<Event>, FakeServer) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (client, mut events) = Client::new(config);
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    client.connect_with_stream(ours).await.unwrap();
    let (reader, writer) = tokio::io::split(theirs);
    let mut server = FakeServer {
        lines: BufReader::new(reader).lines(),
        writer,
    };
    assert_eq!(next_event(&mut events).await, Event::Connected);
    while !server.expect().await.starts_with("USER ") {}
    (client, events, server)
}

#[tokio::test]
async fn registration_is_pass_nick_user() {
    let (client, mut events) = Client::new(ClientConfig {
        password: Some("hunter2".into()),
        ..config("neo")
    });
    let (ours, theirs) = tokio::io::duplex(4096);
    client.connect_with_stream(ours).await.unwrap();
    let (reader, writer) = tokio::io::split(theirs);
    let mut server = FakeServer {
        lines: BufReader::new(reader).lines(),
        writer,
    };

    assert_eq!(next_event(&mut events).await, Event::Connected);
    assert_eq!(server.expect().await, "PASS hunter2");
    assert_eq!(server.expect().await, "NICK neo");
    assert_eq!(server.expect().await, "USER neo 0 * :Test User");
    assert!(client.is_connected());
}

#[tokio::test]
async fn ping_is_answered_once_and_not_surfaced() {
    let (client, mut events, mut server) = connected(config("neo")).await;

    server.send("PING :abc123").await;
    assert_eq!(server.expect().await, "PONG :abc123");

    // The next event must come from the welcome, not from the PING.
    server.send(":srv 001 neo :Welcome").await;
    assert_eq!(
        next_event(&mut events).await,
        Event::Welcome { nick: "neo".into() }
    );

    client.send_raw("WHOIS bob").await.unwrap();
    assert_eq!(server.expect().await, "WHOIS bob");
}

#[tokio::test]
async fn private_message_opens_query_named_after_sender() {
    let (client, mut events, mut server) = connected(config("neo")).await;

    server.send(":alice!a@example.org PRIVMSG neo :hello there").await;
    assert_eq!(
        next_event(&mut events).await,
        Event::ChannelOpened {
            channel: "alice".into()
        }
    );
    let Event::Line(line) = next_event(&mut events).await else {
        panic!("expected a chat line");
    };
    assert_eq!(line.channel, "alice");
    assert_eq!(line.sender, "alice");
    assert_eq!(line.text, "hello there");
    assert_eq!(line.kind, LineKind::Message);

    let snapshot = client.snapshot().await.unwrap();
    let names: Vec<&str> = snapshot.channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Server", "alice"]);
}

#[tokio::test]
async fn privmsg_is_sent_and_echoed_locally() {
    let (client, mut events, mut server) = connected(config("neo")).await;

    client.privmsg("bob", "hi bob").await.unwrap();
    assert_eq!(server.expect().await, "PRIVMSG bob :hi bob");

    let event = wait_for(&mut events, |e| matches!(e, Event::Line(_))).await;
    let Event::Line(line) = event else {
        unreachable!()
    };
    assert_eq!(line.channel, "bob");
    assert_eq!(line.sender, "neo");
    assert!(line.outgoing);

    client.action("bob", "waves").await.unwrap();
    assert_eq!(server.expect().await, "PRIVMSG bob :\x01ACTION waves\x01");
}

#[tokio::test]
async fn welcome_triggers_auto_join() {
    let (_client, mut events, mut server) = connected(ClientConfig {
        auto_join: Some("rust".into()),
        ..config("neo")
    })
    .await;

    server.send(":srv 001 neo_ :Welcome to the network").await;
    assert_eq!(server.expect().await, "JOIN #rust");
    assert_eq!(
        next_event(&mut events).await,
        Event::Welcome {
            nick: "neo_".into()
        }
    );
}

#[tokio::test]
async fn caller_commands_use_documented_wire_forms() {
    let (client, _events, mut server) = connected(config("neo")).await;

    client.join("@rust").await.unwrap();
    assert_eq!(server.expect().await, "JOIN #rust");
    client.part("#rust", Some("later")).await.unwrap();
    assert_eq!(server.expect().await, "PART #rust :later");
    client.change_topic("#rust", "new topic").await.unwrap();
    assert_eq!(server.expect().await, "TOPIC #rust :new topic");
    client
        .set_rank("#rust", "bob", konnect_sdk::Rank::Voice, true)
        .await
        .unwrap();
    assert_eq!(server.expect().await, "MODE #rust +v bob");
    client.ban("#rust", "spammer", None).await.unwrap();
    assert_eq!(server.expect().await, "MODE #rust +b spammer!*@*");
    assert_eq!(server.expect().await, "KICK #rust spammer :Banned by admin");
    client.set_away(Some("lunch")).await.unwrap();
    assert_eq!(server.expect().await, "AWAY :lunch");
    client.set_away(None).await.unwrap();
    assert_eq!(server.expect().await, "AWAY");
    client.send_raw("PRIVMSG #a :one\r\nQUIT").await.unwrap();
    assert_eq!(server.expect().await, "PRIVMSG #a :one");
}

#[tokio::test]
async fn directory_is_refreshed_from_list_replies() {
    let (client, mut events, mut server) = connected(ClientConfig {
        favorites: vec!["#rust".into()],
        ..config("neo")
    })
    .await;

    client.refresh_channel_list().await.unwrap();
    assert_eq!(server.expect().await, "LIST");
    server.send(":srv 322 neo #small 3 :tiny").await;
    server.send(":srv 322 neo #rust 120 :Rust talk").await;
    server.send(":srv 322 neo #mid 40 :middling").await;
    server.send(":srv 323 neo :End of /LIST").await;
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, Event::DirectoryUpdated { .. })).await,
        Event::DirectoryUpdated { entries: 3 }
    );

    let view = client.directory_view("");
    assert_eq!(view.favorites.len(), 1);
    assert_eq!(view.favorites[0].name, "#rust");
    let others: Vec<&str> = view.others.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(others, vec!["#mid", "#small"]);

    assert!(!client.toggle_favorite("#rust").await.unwrap());
    assert!(client.directory_view("RUST").favorites.is_empty());
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (client, mut events, mut server) = connected(config("neo")).await;

    client.disconnect(Some("bye")).await.unwrap();
    assert_eq!(server.expect().await, "QUIT :bye");
    assert_eq!(server.recv().await, None);
    assert!(matches!(
        next_event(&mut events).await,
        Event::Disconnected { .. }
    ));

    client.disconnect(Some("again")).await.unwrap();
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Closed);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn server_closing_the_stream_disconnects_once() {
    let (client, mut events, mut server) = connected(config("neo")).await;

    server.send(":neo!u@h JOIN #rust").await;
    wait_for(&mut events, |e| matches!(e, Event::ChannelOpened { .. })).await;
    drop(server);

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        let done = matches!(event, Event::Disconnected { .. });
        seen.push(event);
        if done {
            break;
        }
    }
    assert!(seen.contains(&Event::ChannelClosed {
        channel: "#rust".into()
    }));
    assert!(!seen.iter().any(|e| matches!(e, Event::Error { .. })));

    client.disconnect(None).await.unwrap();
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.channels.len(), 1);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn commands_while_disconnected_are_no_ops() {
    let (client, mut events) = Client::new(config("neo"));
    assert_eq!(client.state(), ConnectionState::Idle);

    client.join("#rust").await.unwrap();
    client.privmsg("#rust", "hello?").await.unwrap();
    client.refresh_channel_list().await.unwrap();
    client.disconnect(None).await.unwrap();

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.channels.len(), 1);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn refused_connection_reports_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (client, mut events) = Client::new(config("neo"));
    client.connect("127.0.0.1", port).await.unwrap();
    let Event::Error { message } = next_event(&mut events).await else {
        panic!("expected an error event");
    };
    assert!(message.starts_with("Connection failed"));
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn read_failure_reports_error_then_one_disconnect() {
    let (client, mut events, _fail_writes, _theirs) = flaky(true).await;

    assert_eq!(
        next_event(&mut events).await,
        Event::Error {
            message: "Read error: reset".into()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        Event::Disconnected {
            reason: "Connection lost".into()
        }
    );

    client.disconnect(Some("bye")).await.unwrap();
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Closed);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn write_failure_tears_down_through_the_session() {
    let (client, mut events, fail_writes, _theirs) = flaky(false).await;

    fail_writes.store(true, Ordering::SeqCst);
    assert!(client.privmsg("#rust", "hello").await.is_err());
    assert_eq!(
        next_event(&mut events).await,
        Event::Error {
            message: "Write error: reset".into()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        Event::Disconnected {
            reason: "Write failed".into()
        }
    );
    assert!(!client.is_connected());

    // Nothing left to fail or to report.
    client.send_raw("PRIVMSG #rust :again").await.unwrap();
    client.disconnect(None).await.unwrap();
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Closed);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn pending_connect_does_not_stall_the_session() {
    let (client, mut events) = Client::new(config("neo"));
    // Non-routable: the connect either hangs or fails fast, depending on the
    // host's network.
    client.connect("10.255.255.1", 6667).await.unwrap();
    timeout(Duration::from_millis(500), client.snapshot())
        .await
        .expect("snapshot waited on the connect")
        .unwrap();

    client.disconnect(None).await.unwrap();
    match next_event(&mut events).await {
        Event::Disconnected { reason } => assert_eq!(reason, "Connect cancelled"),
        Event::Error { message } => assert!(message.starts_with("Connection failed")),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        timeout(WAIT, client.snapshot()).await.unwrap().unwrap().state,
        ConnectionState::Closed
    );
}
