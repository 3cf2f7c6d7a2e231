//! Line framing: turns an inbound byte stream into decoded [`Message`]s.
//!
//! Lines end at `\n`; a preceding `\r` is stripped. Bytes are decoded as
//! UTF-8 lossily because IRC networks carry mixed encodings and a single bad
//! byte must not take the connection down.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::irc::Message;

pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(512),
        }
    }

    /// Next raw line without its terminator. `Ok(None)` once the stream has closed.
    ///
    /// Cancel safe: bytes of an unfinished line stay in the buffer and are
    /// completed by the next call.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let mut end = self.buf.len();
        while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }

    /// Next decodable message. Empty and malformed lines are skipped.
    /// `Ok(None)` once the stream has closed.
    pub async fn next_message(&mut self) -> std::io::Result<Option<Message>> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };
            tracing::trace!("<< {line}");
            match Message::parse(&line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => tracing::trace!("dropping undecodable line ({e}): {line:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn reader(bytes: &'static [u8]) -> FrameReader<BufReader<&'static [u8]>> {
        FrameReader::new(BufReader::new(bytes))
    }

    #[tokio::test]
    async fn yields_messages_then_end() {
        let mut frames = reader(b"PING :a\r\n:n!u@h PRIVMSG #c :hi there\n");
        let first = frames.next_message().await.unwrap().unwrap();
        assert_eq!(first.command, "PING");
        let second = frames.next_message().await.unwrap().unwrap();
        assert_eq!(second.params, vec!["#c", "hi there"]);
        assert!(frames.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skips_blank_and_malformed_lines() {
        let mut frames = reader(b"\r\n\r\n:prefix-only\r\nJOIN #c\r\n");
        let msg = frames.next_message().await.unwrap().unwrap();
        assert_eq!(msg.command, "JOIN");
        assert!(frames.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn final_line_without_terminator_is_still_delivered() {
        let mut frames = reader(b"NICK alice");
        let msg = frames.next_message().await.unwrap().unwrap();
        assert_eq!(msg.params, vec!["alice"]);
        assert!(frames.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_fatal() {
        let mut frames = reader(b"PRIVMSG #c :caf\xe9\r\nPING :x\r\n");
        let msg = frames.next_message().await.unwrap().unwrap();
        assert!(msg.params[1].starts_with("caf"));
        let ping = frames.next_message().await.unwrap().unwrap();
        assert_eq!(ping.command, "PING");
    }
}
