use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::peer::{Line, PeerId};

/// Longest inbound line accepted before the connection is treated as broken.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// A message submitted by one peer for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    from: PeerId,
    text: String,
}

impl Envelope {
    pub fn new(from: PeerId, text: impl Into<String>) -> Self {
        Self {
            from,
            text: text.into(),
        }
    }

    pub fn from(&self) -> &PeerId {
        &self.from
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Renders the wire form `"<sender_id>: <text>\n"`.
    pub fn render(&self) -> Line {
        Line::from(format!("{}: {}\n", self.from, self.text))
    }
}

/// First line a peer receives after joining.
pub fn greeting(id: &PeerId) -> Line {
    Line::from(format!("Hello, {id}\n"))
}

/// Line framing over a buffered reader.
///
/// Lines are `\n`-terminated; the terminator and a trailing `\r` are
/// stripped. A final line without a terminator is still returned. Lines longer
/// than `max_len` bytes and lines that are not UTF-8 fail with
/// [`io::ErrorKind::InvalidData`].
///
/// [`LineReader::next_line`] is cancel safe: bytes of a partly received line
/// stay in the reader's buffer until the rest arrives, so it can sit in a
/// `select!` next to other branches.
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            max_len,
        }
    }

    /// Returns the next line, or `Ok(None)` at end of stream.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        // Room for the content plus a "\r\n" terminator.
        let limit = (self.max_len as u64).saturating_add(2);
        let budget = limit.saturating_sub(self.buf.len() as u64);
        (&mut self.reader)
            .take(budget)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.buf);
        let terminated = line.last() == Some(&b'\n');
        if !terminated && line.len() as u64 >= limit {
            return Err(line_too_long(self.max_len));
        }
        if terminated {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.len() > self.max_len {
            return Err(line_too_long(self.max_len));
        }

        String::from_utf8(line)
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

/// Reads a single line with [`LineReader`] framing. Not cancel safe: any
/// partial line is lost if the future is dropped.
pub async fn read_line<R>(reader: &mut R, max_len: usize) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    LineReader::new(reader, max_len).next_line().await
}

/// Writes an already terminated line and flushes so peers see it promptly.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

fn line_too_long(max_len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line exceeds {max_len} bytes"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(input: &[u8], max_len: usize) -> Vec<io::Result<Option<String>>> {
        let mut reader = tokio::io::BufReader::new(input);
        let mut results = Vec::new();
        loop {
            let result = read_line(&mut reader, max_len).await;
            let done = !matches!(result, Ok(Some(_)));
            results.push(result);
            if done {
                return results;
            }
        }
    }

    #[test]
    fn envelope_renders_sender_prefix() {
        let envelope = Envelope::new(PeerId::from("10.0.0.1:5000"), "hi");
        assert_eq!(envelope.text(), "hi");
        assert_eq!(envelope.render().as_ref(), "10.0.0.1:5000: hi\n");
        assert_eq!(greeting(envelope.from()).as_ref(), "Hello, 10.0.0.1:5000\n");
    }

    #[tokio::test]
    async fn reads_lines_and_strips_terminators() {
        let results = read_all(b"one\r\ntwo\n\nlast", 64).await;
        let lines: Vec<_> = results
            .into_iter()
            .map(|result| result.expect("valid input"))
            .collect();
        assert_eq!(
            lines,
            vec![
                Some("one".to_string()),
                Some("two".to_string()),
                Some(String::new()),
                Some("last".to_string()),
                None,
            ]
        );
    }

    #[tokio::test]
    async fn line_at_limit_is_accepted() {
        let mut reader = tokio::io::BufReader::new(&b"abcd\r\nrest\n"[..]);
        let line = read_line(&mut reader, 4).await.expect("fits");
        assert_eq!(line.as_deref(), Some("abcd"));
        let next = read_line(&mut reader, 4).await.expect("fits");
        assert_eq!(next.as_deref(), Some("rest"));
    }

    #[tokio::test]
    async fn overlong_line_is_rejected() {
        let mut reader = tokio::io::BufReader::new(&b"abcdefgh\n"[..]);
        let err = read_line(&mut reader, 4).await.expect_err("too long");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut reader = tokio::io::BufReader::new(&b"abcde\n"[..]);
        let err = read_line(&mut reader, 4).await.expect_err("too long");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn unterminated_final_line_drops_carriage_return() {
        let mut reader = tokio::io::BufReader::new(&b"abcd\r"[..]);
        let line = read_line(&mut reader, 4).await.expect("fits");
        assert_eq!(line.as_deref(), Some("abcd"));
    }

    #[tokio::test]
    async fn unbounded_limit_does_not_overflow() {
        let mut reader = tokio::io::BufReader::new(&b"hi\nthere"[..]);
        let mut lines = LineReader::new(&mut reader, usize::MAX);
        assert_eq!(lines.next_line().await.expect("read").as_deref(), Some("hi"));
        assert_eq!(
            lines.next_line().await.expect("read").as_deref(),
            Some("there")
        );
        assert_eq!(lines.next_line().await.expect("read"), None);
    }

    #[tokio::test]
    async fn interrupted_read_keeps_partial_line() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut lines = LineReader::new(tokio::io::BufReader::new(reader), 64);

        writer.write_all(b"hello ").await.expect("write");
        tokio::select! {
            line = lines.next_line() => panic!("line completed early: {line:?}"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
        }

        writer.write_all(b"world\n").await.expect("write");
        let line = lines.next_line().await.expect("read");
        assert_eq!(line.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn invalid_utf8_is_rejected() {
        let mut reader = tokio::io::BufReader::new(&[0xff, 0xfe, b'\n'][..]);
        let err = read_line(&mut reader, 64).await.expect_err("not utf-8");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn write_line_flushes_bytes() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = tokio::io::BufReader::new(reader);
        write_line(&mut writer, "a: b\n").await.expect("write");
        let line = read_line(&mut reader, 64).await.expect("read");
        assert_eq!(line.as_deref(), Some("a: b"));
    }
}
