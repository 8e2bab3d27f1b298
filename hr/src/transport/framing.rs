//! Newline-delimited JSON framing
//!
//! Each message is a single line of JSON followed by `\n`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::TransportError;
use crate::broker::Message;

/// Read one frame
///
/// Returns `Ok(None)` at end of stream. An oversized or malformed line is an
/// error, but the stream stays usable for the next frame. At most
/// `max_size + 1` bytes of a line are buffered; the rest of an oversized line
/// is discarded without being kept.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Message>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let bytes_read = (&mut *reader)
        .take(max_size as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if bytes_read > max_size {
        let discarded = if line.ends_with(b"\n") {
            0
        } else {
            discard_line(reader).await?
        };
        return Err(TransportError::MessageTooLarge {
            size: bytes_read + discarded,
            max: max_size,
        });
    }

    // invalid UTF-8 surfaces as a JSON error, not an IO error
    let message: Message = serde_json::from_slice(line.trim_ascii())?;
    debug!(kind = message.kind(), bytes_read, "read_frame: parsed message");
    Ok(Some(message))
}

/// Skip to just past the next newline, returning how many bytes were dropped
async fn discard_line<R>(reader: &mut R) -> Result<usize, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut discarded = 0;
    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(discarded);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        discarded += used;
        if done {
            return Ok(discarded);
        }
    }
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, message: &Message, max_size: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_vec(message)?;
    json.push(b'\n');

    if json.len() > max_size {
        return Err(TransportError::MessageTooLarge {
            size: json.len(),
            max: max_size,
        });
    }

    writer.write_all(&json).await?;
    writer.flush().await?;
    debug!(kind = message.kind(), bytes = json.len(), "write_frame: sent message");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = BufReader::new(server);

        let call = Message::Call {
            id: "c-1".to_string(),
            name: "sum".to_string(),
            data: json!({"a": [1, 2, {"b": null}]}),
        };
        let event = Message::Event {
            name: "tick".to_string(),
            data: json!(7),
        };

        write_frame(&mut client, &call, 1024).await.unwrap();
        write_frame(&mut client, &event, 1024).await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), Some(call));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), Some(event));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_poison_stream() {
        let input = b"not json\n{\"kind\":\"event\",\"name\":\"ok\",\"data\":1}\n".to_vec();
        let mut reader = BufReader::new(&input[..]);

        let first = read_frame(&mut reader, 1024).await;
        assert!(matches!(first, Err(TransportError::Json(_))));

        let second = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(second.name(), Some("ok"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(b"{\"kind\":\"event\",\"name\":\"ok\",\"data\":1}\n");
        let mut reader = BufReader::new(&input[..]);

        let first = read_frame(&mut reader, 1024).await;
        match first {
            Err(e) => {
                assert!(matches!(e, TransportError::Json(_)));
                assert!(!e.is_disconnect());
            }
            Ok(frame) => panic!("expected an error, got {:?}", frame),
        }

        let second = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(second.name(), Some("ok"));
    }

    #[tokio::test]
    async fn test_oversized_frames_rejected() {
        let big = Message::Event {
            name: "big".to_string(),
            data: json!("x".repeat(200)),
        };

        let mut sink = Vec::new();
        let result = write_frame(&mut sink, &big, 64).await;
        assert!(matches!(result, Err(TransportError::MessageTooLarge { .. })));
        assert!(sink.is_empty());

        let mut line = serde_json::to_vec(&big).unwrap();
        line.push(b'\n');
        let mut reader = BufReader::new(&line[..]);
        let result = read_frame(&mut reader, 64).await;
        assert!(matches!(result, Err(TransportError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped_without_buffering() {
        let long_line = vec![b'x'; 1 << 20];
        let mut input = long_line.clone();
        input.push(b'\n');
        input.extend_from_slice(b"{\"kind\":\"event\",\"name\":\"after\",\"data\":null}\n");

        // a small buffer forces the discard to walk the line in chunks
        let mut reader = BufReader::with_capacity(256, &input[..]);
        match read_frame(&mut reader, 64).await {
            Err(TransportError::MessageTooLarge { size, max }) => {
                assert_eq!(size, long_line.len() + 1);
                assert_eq!(max, 64);
            }
            other => panic!("expected MessageTooLarge, got {:?}", other),
        }

        let next = read_frame(&mut reader, 64).await.unwrap().unwrap();
        assert_eq!(next.name(), Some("after"));
        assert_eq!(read_frame(&mut reader, 64).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unterminated_oversized_line_reaches_eof() {
        let input = vec![b'y'; 4096];
        let mut reader = BufReader::new(&input[..]);

        let result = read_frame(&mut reader, 64).await;
        assert!(matches!(result, Err(TransportError::MessageTooLarge { size: 4096, .. })));
        assert_eq!(read_frame(&mut reader, 64).await.unwrap(), None);
    }
}
