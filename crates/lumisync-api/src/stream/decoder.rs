// ── Event stream framing ──
//
// Splits the push stream body into events. Frames end at a blank line once
// `\r\n` and bare `\r` are normalized to `\n`. Inside a frame, `event:`
// sets the type and every `data:` line contributes its trimmed payload.

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{trace, warn};

use crate::error::Error;

const DEFAULT_EVENT_TYPE: &str = "message";

/// One framed event before JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event_type: String,
    pub data: String,
}

/// The two event types that carry mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Put,
    Patch,
}

impl PatchKind {
    fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            _ => None,
        }
    }
}

/// A decoded `(path, data)` mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPatch {
    pub kind: PatchKind,
    pub path: String,
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
struct PatchBody {
    path: String,
    #[serde(default)]
    data: serde_json::Value,
}

// ── EventFramer ─────────────────────────────────────────────────────

/// Largest frame buffered before it is discarded.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Incremental framer fed with arbitrary chunk boundaries.
#[derive(Debug)]
pub struct EventFramer {
    buffer: Vec<u8>,
    /// Last byte seen was `\r`; a following `\n` belongs to it.
    pending_cr: bool,
    /// Dropping the rest of an oversized frame until its blank line.
    discarding: bool,
    max_frame_bytes: usize,
}

impl Default for EventFramer {
    fn default() -> Self {
        Self::with_max_frame_bytes(MAX_FRAME_BYTES)
    }
}

impl EventFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            pending_cr: false,
            discarding: false,
            max_frame_bytes,
        }
    }

    /// Feed one chunk and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        // Everything before the previous last byte was already scanned.
        let mut scan_from = self.buffer.len().saturating_sub(1);

        for &byte in chunk {
            match byte {
                b'\r' => {
                    self.buffer.push(b'\n');
                    self.pending_cr = true;
                }
                b'\n' if self.pending_cr => self.pending_cr = false,
                other => {
                    self.buffer.push(other);
                    self.pending_cr = false;
                }
            }
        }

        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[scan_from..]
            .windows(2)
            .position(|w| w == b"\n\n")
        {
            let end = scan_from + offset;
            if self.discarding {
                self.discarding = false;
            } else if let Some(event) =
                parse_frame(&String::from_utf8_lossy(&self.buffer[consumed..end]))
            {
                events.push(event);
            }
            consumed = end + 2;
            scan_from = consumed;
        }
        self.buffer.drain(..consumed);

        if self.buffer.len() > self.max_frame_bytes {
            warn!(
                buffered = self.buffer.len(),
                limit = self.max_frame_bytes,
                "discarding oversized stream frame"
            );
            let trailing_newline = self.buffer.last() == Some(&b'\n');
            self.buffer.clear();
            if trailing_newline {
                self.buffer.push(b'\n');
            }
            self.discarding = true;
        }
        events
    }
}

fn parse_frame(frame: &str) -> Option<RawEvent> {
    let mut event_type: Option<String> = None;
    let mut data = String::new();

    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = Some(rest.trim().to_owned());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push_str(rest.trim());
        }
    }

    if event_type.is_none() && data.is_empty() {
        return None;
    }

    Some(RawEvent {
        event_type: event_type.unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_owned()),
        data,
    })
}

/// Decode one framed event into a mutation.
///
/// Non-mutation types and empty payloads yield `None` silently; malformed
/// JSON yields `None` with a warning.
pub fn decode_event(event: &RawEvent) -> Option<PathPatch> {
    let Some(kind) = PatchKind::from_event_type(&event.event_type) else {
        trace!(event_type = %event.event_type, "ignoring non-mutation event");
        return None;
    };
    if event.data.is_empty() {
        return None;
    }

    match serde_json::from_str::<PatchBody>(&event.data) {
        Ok(body) => Some(PathPatch {
            kind,
            path: body.path,
            data: body.data,
        }),
        Err(e) => {
            warn!(error = %e, event_type = %event.event_type, "dropping malformed stream event");
            None
        }
    }
}

/// Lazily decode a body stream into mutations.
///
/// A transport error is yielded once and ends the sequence.
pub fn decode_patches<S>(bytes: S) -> impl Stream<Item = Result<PathPatch, Error>> + Send
where
    S: Stream<Item = Result<Bytes, Error>> + Send,
{
    async_stream::stream! {
        let mut framer = EventFramer::new();
        let mut bytes = std::pin::pin!(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in framer.push(&chunk) {
                        if let Some(patch) = decode_event(&event) {
                            yield Ok(patch);
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn frames_split_across_chunks() {
        let mut framer = EventFramer::new();
        assert!(framer.push(b"event: put\ndata: {\"path\":").is_empty());
        let events = framer.push(b"\"/\",\"data\":null}\n\nevent: keep-alive\n");
        assert_eq!(
            events,
            vec![RawEvent {
                event_type: "put".into(),
                data: r#"{"path":"/","data":null}"#.into(),
            }]
        );
        let events = framer.push(b"data: null\n\n");
        assert_eq!(events[0].event_type, "keep-alive");
    }

    #[test]
    fn crlf_and_cr_line_endings_are_normalized() {
        let mut framer = EventFramer::new();
        let mut events = framer.push(b"event: patch\r\ndata: {}\r");
        events.extend(framer.push(b"\n\r\nevent: put\rdata: 1\r\r"));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "patch");
        assert_eq!(events[0].data, "{}");
        assert_eq!(events[1].event_type, "put");
        assert_eq!(events[1].data, "1");
    }

    #[test]
    fn blank_line_split_across_chunks_is_found() {
        let mut framer = EventFramer::new();
        assert!(framer.push(b"event: put\ndata: 1\n").is_empty());
        let events = framer.push(b"\nevent: patch\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "1");
        assert_eq!(framer.push(b"data: 2\n\n")[0].event_type, "patch");
    }

    #[test]
    fn oversized_frame_is_discarded_and_framing_resumes() {
        let mut framer = EventFramer::with_max_frame_bytes(32);
        assert!(framer.push(b"event: put\ndata: ").is_empty());
        assert!(framer.push(&[b'x'; 40]).is_empty());
        assert!(framer.push(&[b'y'; 40]).is_empty());

        let events = framer.push(b"\n\nevent: patch\ndata: {}\n\n");
        assert_eq!(
            events,
            vec![RawEvent {
                event_type: "patch".into(),
                data: "{}".into(),
            }]
        );
    }

    #[test]
    fn data_lines_are_trimmed_and_concatenated() {
        let mut framer = EventFramer::new();
        let events = framer.push(b"data:  {\"a\":\ndata: 1}  \n\n");
        assert_eq!(events[0].event_type, "message");
        assert_eq!(events[0].data, r#"{"a":1}"#);
    }

    #[test]
    fn only_mutation_types_decode() {
        let keep_alive = RawEvent {
            event_type: "keep-alive".into(),
            data: "null".into(),
        };
        assert_eq!(decode_event(&keep_alive), None);

        let empty = RawEvent {
            event_type: "put".into(),
            data: String::new(),
        };
        assert_eq!(decode_event(&empty), None);

        let put = RawEvent {
            event_type: "patch".into(),
            data: r#"{"path":"/A","data":{"on":true}}"#.into(),
        };
        assert_eq!(
            decode_event(&put),
            Some(PathPatch {
                kind: PatchKind::Patch,
                path: "/A".into(),
                data: json!({"on": true}),
            })
        );
    }

    #[test]
    fn malformed_json_is_dropped() {
        let bad = RawEvent {
            event_type: "put".into(),
            data: "{not json".into(),
        };
        assert_eq!(decode_event(&bad), None);
    }

    #[tokio::test]
    async fn stream_continues_past_malformed_events() {
        let chunks: Vec<Result<Bytes, Error>> = vec![
            Ok(Bytes::from_static(b"event: put\ndata: {oops\n\n")),
            Ok(Bytes::from_static(
                b"event: put\ndata: {\"path\":\"/B\",\"data\":null}\n\n",
            )),
        ];
        let patches: Vec<_> = decode_patches(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(patches.len(), 1);
        let patch = patches.into_iter().next().and_then(Result::ok);
        assert_eq!(patch.map(|p| p.path), Some("/B".to_owned()));
    }

    #[tokio::test]
    async fn transport_error_ends_the_sequence() {
        let chunks: Vec<Result<Bytes, Error>> = vec![
            Err(Error::StreamEnded),
            Ok(Bytes::from_static(b"event: put\ndata: {\"path\":\"/\",\"data\":{}}\n\n")),
        ];
        let items: Vec<_> = decode_patches(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::StreamEnded)));
    }
}
