//! Server-Sent Events parsing and re-framing.
//!
//! Upstream bytes arrive in arbitrary chunks; `SseEventStream` buffers them and
//! yields one `SseEvent` per blank-line-terminated block. `relay_frames` turns
//! those events into the outbound `data: <payload>\n\n` frames.

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Boxed outbound frame stream, as handed to the HTTP layer.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// One parsed upstream event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Serialize as an outbound frame. Multi-line payloads keep one `data:`
    /// line per payload line so the frame stays well formed.
    pub fn to_frame(&self) -> Bytes {
        let mut out = String::with_capacity(self.data.len() + 8);
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }

    fn parse(block: &[u8]) -> Self {
        let text = String::from_utf8_lossy(block);
        let mut event = SseEvent::default();
        let mut data_lines: Vec<&str> = Vec::new();

        for line in text.split(['\r', '\n']) {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.find(':') {
                Some(idx) => {
                    let value = &line[idx + 1..];
                    (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
                }
                None => (line, ""),
            };
            match field {
                "data" => data_lines.push(value),
                "event" => event.event = Some(value.to_string()),
                "id" => event.id = Some(value.to_string()),
                _ => {}
            }
        }

        event.data = data_lines.join("\n");
        event
    }
}

/// `data: {"error": "<message>"}\n\n`
pub fn error_frame(message: &str) -> Bytes {
    let body = serde_json::json!({ "error": message });
    Bytes::from(format!("data: {}\n\n", body))
}

/// Line endings may be LF, CRLF or a lone CR.
const EVENT_DELIMITERS: [&[u8]; 3] = [b"\r\n\r\n", b"\n\n", b"\r\r"];

/// Returns (end of event, delimiter length) for the first blank line.
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    EVENT_DELIMITERS
        .iter()
        .filter_map(|delimiter| {
            buffer
                .windows(delimiter.len())
                .position(|w| w == *delimiter)
                .map(|pos| (pos, delimiter.len()))
        })
        .min_by_key(|&(pos, _)| pos)
}

/// Parses an upstream byte stream into `SseEvent`s.
pub struct SseEventStream<S> {
    inner: S,
    buffer: Vec<u8>,
    done: bool,
}

impl<S, E> SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            done: false,
        }
    }

    fn next_event(&mut self) -> Option<SseEvent> {
        let (end, delimiter) = find_event_boundary(&self.buffer)?;
        let block = self.buffer.drain(..end + delimiter).collect::<Vec<u8>>();
        Some(SseEvent::parse(&block[..end]))
    }
}

impl<S, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.next_event() {
                return Poll::Ready(Some(Ok(event)));
            }

            if this.done {
                if this.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                    this.buffer.clear();
                    return Poll::Ready(None);
                }
                // Dispatch a trailing event even if the upstream omitted the terminator
                let remaining = std::mem::take(&mut this.buffer);
                return Poll::Ready(Some(Ok(SseEvent::parse(&remaining))));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Re-frame an upstream byte stream for the client.
///
/// Events with empty data are dropped. A read error becomes a single error
/// frame and ends the stream.
pub fn relay_frames<S, E>(upstream: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut events = SseEventStream::new(upstream);
    Box::pin(async_stream::stream! {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if !event.data.is_empty() {
                        yield Ok::<Bytes, std::io::Error>(event.to_frame());
                    }
                }
                Err(err) => {
                    tracing::warn!("Upstream event stream failed: {}", err);
                    yield Ok::<Bytes, std::io::Error>(error_frame(&err.to_string()));
                    break;
                }
            }
        }
    })
}

/// A stream that emits one error frame and ends.
pub fn error_stream(message: &str) -> FrameStream {
    let frame = error_frame(message);
    Box::pin(futures_util::stream::once(async move {
        Ok::<Bytes, std::io::Error>(frame)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        let owned: Vec<Result<Bytes, std::io::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(owned)
    }

    async fn collect_frames(stream: FrameStream) -> Vec<String> {
        stream
            .map(|item| String::from_utf8(item.unwrap().to_vec()).unwrap())
            .collect()
            .await
    }

    #[actix_rt::test]
    async fn events_split_across_chunks() {
        let upstream = chunks(&["event: reply\nda", "ta: {\"a\":1}\n", "\ndata: two\n\n"]);
        let events: Vec<SseEvent> = SseEventStream::new(upstream)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("reply"));
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].data, "two");
    }

    #[actix_rt::test]
    async fn crlf_comments_and_multiline_data() {
        let upstream = chunks(&[": keepalive\r\n\r\nid: 7\r\ndata: first\r\ndata: second\r\n\r\n"]);
        let events: Vec<SseEvent> = SseEventStream::new(upstream)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(events[0].data.is_empty());
        assert_eq!(events[1].id.as_deref(), Some("7"));
        assert_eq!(events[1].data, "first\nsecond");
        assert_eq!(
            events[1].to_frame(),
            Bytes::from_static(b"data: first\ndata: second\n\n")
        );
    }

    #[actix_rt::test]
    async fn cr_only_line_endings_split_events() {
        let upstream = chunks(&["event: reply\rdata: one\r\r", "data: two\rdata: more\r\r"]);
        let events: Vec<SseEvent> = SseEventStream::new(upstream)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("reply"));
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two\nmore");
    }

    #[test]
    fn boundary_is_earliest_blank_line() {
        assert_eq!(find_event_boundary(b"data: a\r\rdata: b\n\n"), Some((7, 2)));
        assert_eq!(find_event_boundary(b"data: a\r\n\r\ndata: b\r\r"), Some((7, 4)));
        assert_eq!(find_event_boundary(b"data: a\n\ndata: b\r\r"), Some((7, 2)));
        assert_eq!(find_event_boundary(b"data: a\r\n"), None);
    }

    #[actix_rt::test]
    async fn relay_keeps_order_and_skips_empty_data() {
        let upstream = chunks(&[
            "data: {\"n\":1}\n\n",
            "event: ping\ndata:\n\n",
            "data: {\"n\":2}\n\ndata: {\"n\":3}\n\n",
        ]);
        let frames = collect_frames(relay_frames(upstream)).await;
        assert_eq!(
            frames,
            vec![
                "data: {\"n\":1}\n\n".to_string(),
                "data: {\"n\":2}\n\n".to_string(),
                "data: {\"n\":3}\n\n".to_string(),
            ]
        );
    }

    #[actix_rt::test]
    async fn trailing_event_without_terminator_is_dispatched() {
        let frames = collect_frames(relay_frames(chunks(&["data: last"]))).await;
        assert_eq!(frames, vec!["data: last\n\n".to_string()]);
    }

    #[actix_rt::test]
    async fn read_error_ends_with_single_error_frame() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"data: ok\n\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from_static(b"data: never\n\n")),
        ]);
        let frames = collect_frames(relay_frames(upstream)).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], "data: ok\n\n");
        let payload: serde_json::Value =
            serde_json::from_str(frames[1].trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(payload["error"], "connection reset");
    }

    #[test]
    fn error_frame_is_json_object() {
        let frame = error_frame("boom \"quoted\"");
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.ends_with("\n\n"));
        let payload: serde_json::Value =
            serde_json::from_str(text.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(payload["error"], "boom \"quoted\"");
    }
}
