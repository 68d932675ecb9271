use crate::error::ApiError;
use crate::protocol::{ChatEvent, StreamUnit};
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::pin;
use thiserror::Error;
use tracing::{debug, warn};

const EVENT_PREFIX: &str = "event: ";
const DATA_PREFIX: &str = "data: ";
pub const MESSAGE_EVENT_TYPE: &str = "message";

/// A line the decoder skipped. Skipped lines never end the stream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SseLineError {
    #[error("data line is not valid JSON: {0}")]
    MalformedJson(String),
}

/// Receives classified units in stream order.
pub trait StreamSink {
    fn on_content(&mut self, chunk: String);
    fn on_event(&mut self, event: ChatEvent);
    fn on_session_id(&mut self, id: String);

    fn accept(&mut self, unit: StreamUnit) {
        match unit {
            StreamUnit::Content(chunk) => self.on_content(chunk),
            StreamUnit::Event(event) => self.on_event(event),
            StreamUnit::SessionId(id) => self.on_session_id(id),
        }
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of a UTF-8 sequence split across chunks.
    pending: Vec<u8>,
    /// Text after the last newline seen so far.
    line: String,
    /// Prefix of `line` already searched for a newline.
    scanned: usize,
    event_type: Option<String>,
    skipped: Vec<SseLineError>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines skipped so far, in order.
    pub fn skipped(&self) -> &[SseLineError] {
        &self.skipped
    }

    pub fn has_partial_line(&self) -> bool {
        !self.line.is_empty() || !self.pending.is_empty()
    }

    /// Decodes one chunk and returns the units completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamUnit> {
        self.decode_text(chunk);

        let buffer = std::mem::take(&mut self.line);
        let mut units = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = buffer[search_from..].find('\n') {
            let end = search_from + offset;
            let line = buffer[start..end].trim_end_matches('\r');
            match self.decode_line(line) {
                Ok(decoded) => units.extend(decoded),
                Err(err) => {
                    warn!(error = %err, "skipping event stream line");
                    self.skipped.push(err);
                }
            }
            start = end + 1;
            search_from = start;
        }

        self.line = buffer;
        self.line.drain(..start);
        self.scanned = self.line.len();
        units
    }

    /// Applies one complete line to the decoder state.
    pub fn decode_line(&mut self, line: &str) -> Result<Vec<StreamUnit>, SseLineError> {
        if line.is_empty() {
            self.event_type = None;
            return Ok(Vec::new());
        }

        if let Some(kind) = line.strip_prefix(EVENT_PREFIX) {
            let kind = kind.trim();
            self.event_type = (!kind.is_empty()).then(|| kind.to_string());
            return Ok(Vec::new());
        }

        if let Some(raw) = line.strip_prefix(DATA_PREFIX) {
            let payload: Value = serde_json::from_str(raw.trim())
                .map_err(|e| SseLineError::MalformedJson(e.to_string()))?;
            return Ok(classify(self.event_type.as_deref(), payload));
        }

        Ok(Vec::new())
    }

    fn decode_text(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    self.line.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid = start + err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[start..valid]) {
                        self.line.push_str(text);
                    }
                    start = valid;
                    match err.error_len() {
                        Some(len) => {
                            self.line.push(char::REPLACEMENT_CHARACTER);
                            start += len;
                        }
                        None => break,
                    }
                }
            }
        }

        self.pending.drain(..start);
    }
}

fn classify(event_type: Option<&str>, payload: Value) -> Vec<StreamUnit> {
    let mut units = Vec::with_capacity(2);

    let session_id = payload
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let is_content = match event_type {
        Some(kind) => kind == MESSAGE_EVENT_TYPE,
        None => is_truthy(payload.get("content")),
    };

    if is_content {
        units.push(StreamUnit::Content(content_text(payload.get("content"))));
    } else if let Some(kind) = event_type {
        units.push(StreamUnit::Event(ChatEvent {
            kind: kind.to_string(),
            data: payload,
        }));
    } else {
        // Untyped data without content. A custom event that lost its
        // `event:` line lands here too.
        debug!("untyped data line without content");
    }

    if let Some(id) = session_id {
        units.push(StreamUnit::SessionId(id));
    }
    units
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(_) => true,
    }
}

fn content_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Lazily decodes `bytes` into units. A read error ends the sequence with a
/// transport error; an unterminated final line is dropped.
pub fn stream_units<S, E>(bytes: S) -> impl Stream<Item = Result<StreamUnit, ApiError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let state = (Box::pin(bytes), SseDecoder::new(), VecDeque::new());

    stream::unfold(Some(state), |state| async move {
        let (mut bytes, mut decoder, mut queue) = state?;
        loop {
            if let Some(unit) = queue.pop_front() {
                return Some((Ok(unit), Some((bytes, decoder, queue))));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => queue.extend(decoder.feed(&chunk)),
                Some(Err(err)) => return Some((Err(ApiError::Transport(err.to_string())), None)),
                None => {
                    if decoder.has_partial_line() {
                        debug!("event stream ended mid-line");
                    }
                    return None;
                }
            }
        }
    })
}

/// Drives `sink` with every unit decoded from `bytes`.
pub async fn decode_stream<S, E, K>(bytes: S, sink: &mut K) -> Result<(), ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
    K: StreamSink + ?Sized,
{
    let mut units = pin!(stream_units(bytes));
    while let Some(unit) = units.next().await {
        sink.accept(unit?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        content: Vec<String>,
        events: Vec<ChatEvent>,
        session_ids: Vec<String>,
    }

    impl StreamSink for Recorder {
        fn on_content(&mut self, chunk: String) {
            self.calls.push(format!("content:{chunk}"));
            self.content.push(chunk);
        }

        fn on_event(&mut self, event: ChatEvent) {
            self.calls.push(format!("event:{}", event.kind));
            self.events.push(event);
        }

        fn on_session_id(&mut self, id: String) {
            self.calls.push(format!("session:{id}"));
            self.session_ids.push(id);
        }
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::copy_from_slice(part.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn named_event_then_message_content() {
        let input = "event: tool_call\ndata: {\"foo\":1}\n\nevent: message\ndata: {\"content\":\"hi\"}\n\n";
        let mut sink = Recorder::default();
        decode_stream(chunks(&[input]), &mut sink)
            .await
            .unwrap();

        assert_eq!(
            sink.events,
            vec![ChatEvent {
                kind: "tool_call".to_string(),
                data: json!({"foo": 1}),
            }]
        );
        assert_eq!(sink.content, vec!["hi".to_string()]);
        assert_eq!(sink.calls, vec!["event:tool_call", "content:hi"]);
    }

    #[test]
    fn untyped_data_with_content_is_content() {
        let mut decoder = SseDecoder::new();
        let units = decoder.feed(b"data: {\"content\":\"partial\"}\n\n");
        assert_eq!(units, vec![StreamUnit::Content("partial".to_string())]);
    }

    #[test]
    fn untyped_data_without_content_is_dropped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"status\":\"thinking\"}\n\n").is_empty());
        assert!(decoder.feed(b"data: {\"content\":\"\"}\n\n").is_empty());
    }

    #[test]
    fn message_event_defaults_missing_content_to_empty() {
        let mut decoder = SseDecoder::new();
        let units = decoder.feed(b"event: message\ndata: {\"done\":true}\n\n");
        assert_eq!(units, vec![StreamUnit::Content(String::new())]);
    }

    #[test]
    fn malformed_json_is_skipped_and_recorded() {
        let mut decoder = SseDecoder::new();
        let units = decoder.feed(b"data: not-json\ndata: {\"content\":\"ok\"}\n\n");
        assert_eq!(units, vec![StreamUnit::Content("ok".to_string())]);
        assert_eq!(decoder.skipped().len(), 1);
        assert!(matches!(decoder.skipped()[0], SseLineError::MalformedJson(_)));
    }

    #[test]
    fn decode_line_reports_malformed_json() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode_line("data: {oops").is_err());
        assert!(decoder.decode_line(": keep-alive").unwrap().is_empty());
    }

    #[test]
    fn blank_line_resets_event_type() {
        let mut decoder = SseDecoder::new();
        let units = decoder.feed(b"event: tool_call\n\ndata: {\"content\":\"after\"}\n");
        assert_eq!(units, vec![StreamUnit::Content("after".to_string())]);
    }

    #[test]
    fn event_type_applies_to_every_data_line_until_blank() {
        let mut decoder = SseDecoder::new();
        let units = decoder.feed(b"event: step\ndata: {\"n\":1}\ndata: {\"n\":2}\n\n");
        assert_eq!(units.len(), 2);
        assert!(matches!(&units[1], StreamUnit::Event(event) if event.data == json!({"n": 2})));
    }

    #[test]
    fn session_id_follows_content_from_same_payload() {
        let mut decoder = SseDecoder::new();
        let units = decoder.feed(b"data: {\"content\":\"hey\",\"session_id\":\"conv-1\"}\n\n");
        assert_eq!(
            units,
            vec![
                StreamUnit::Content("hey".to_string()),
                StreamUnit::SessionId("conv-1".to_string()),
            ]
        );
    }

    #[test]
    fn session_id_is_reported_for_named_events() {
        let mut decoder = SseDecoder::new();
        let units = decoder.feed(b"event: done\ndata: {\"session_id\":\"conv-9\"}\n\n");
        assert_eq!(units.len(), 2);
        assert_eq!(units[1], StreamUnit::SessionId("conv-9".to_string()));
    }

    #[test]
    fn lines_split_across_chunks_are_reassembled() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: mess").is_empty());
        assert!(decoder.feed(b"age\ndata: {\"con").is_empty());
        assert!(decoder.has_partial_line());
        let units = decoder.feed(b"tent\":\"joined\"}\n");
        assert_eq!(units, vec![StreamUnit::Content("joined".to_string())]);
    }

    #[test]
    fn many_lines_in_one_chunk_decode_in_order() {
        let body: String = (0..500)
            .map(|i| format!("data: {{\"content\":\"{i} \"}}\n\n"))
            .collect();
        let mut decoder = SseDecoder::new();
        let units = decoder.feed(body.as_bytes());
        assert_eq!(units.len(), 500);
        assert_eq!(units[0], StreamUnit::Content("0 ".to_string()));
        assert_eq!(units[499], StreamUnit::Content("499 ".to_string()));
        assert!(!decoder.has_partial_line());
    }

    #[test]
    fn long_line_fed_byte_by_byte() {
        let text = "x".repeat(4096);
        let line = format!("data: {{\"content\":\"{text}\"}}\r\n");
        let mut decoder = SseDecoder::new();
        let (last, head) = line.as_bytes().split_last().unwrap();
        for byte in head {
            assert!(decoder.feed(std::slice::from_ref(byte)).is_empty());
        }
        assert_eq!(
            decoder.feed(std::slice::from_ref(last)),
            vec![StreamUnit::Content(text)]
        );
        assert!(!decoder.has_partial_line());
    }

    #[test]
    fn multibyte_characters_split_across_chunks() {
        let payload = "data: {\"content\":\"caf\u{e9} \u{1f680}\"}\n";
        let bytes = payload.as_bytes();
        let rocket = payload.find('\u{1f680}').unwrap();

        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&bytes[..rocket + 2]).is_empty());
        let units = decoder.feed(&bytes[rocket + 2..]);
        assert_eq!(
            units,
            vec![StreamUnit::Content("caf\u{e9} \u{1f680}".to_string())]
        );
    }

    #[test]
    fn invalid_utf8_becomes_replacement_character() {
        let mut decoder = SseDecoder::new();
        let mut line = b"data: {\"content\":\"a".to_vec();
        line.push(0xff);
        line.extend_from_slice(b"b\"}\n");
        let units = decoder.feed(&line);
        assert_eq!(units, vec![StreamUnit::Content("a\u{fffd}b".to_string())]);
    }

    #[test]
    fn crlf_framing_is_accepted() {
        let mut decoder = SseDecoder::new();
        let units = decoder.feed(b"event: tool_call\r\ndata: {\"x\":1}\r\n\r\ndata: {\"content\":\"c\"}\r\n");
        assert_eq!(units.len(), 2);
        assert_eq!(units[1], StreamUnit::Content("c".to_string()));
    }

    #[tokio::test]
    async fn unterminated_final_line_is_dropped() {
        let units: Vec<_> = stream_units(chunks(&[
            "data: {\"content\":\"a\"}\n",
            "data: {\"content\":\"b\"}",
        ]))
        .collect()
        .await;
        assert_eq!(units, vec![Ok(StreamUnit::Content("a".to_string()))]);
    }

    #[tokio::test]
    async fn read_error_ends_stream_with_transport_error() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"content\":\"a\"}\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from_static(b"data: {\"content\":\"never\"}\n")),
        ];
        let units: Vec<_> = stream_units(stream::iter(parts)).collect().await;
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], Ok(StreamUnit::Content("a".to_string())));
        assert!(matches!(&units[1], Err(ApiError::Transport(msg)) if msg.contains("connection reset")));
    }

    #[tokio::test]
    async fn sink_sees_units_in_wire_order() {
        let mut sink = Recorder::default();
        decode_stream(
            chunks(&[
                "event: message\ndata: {\"content\":\"one\"}\n\n",
                "event: tool_call\ndata: {\"name\":\"search\"}\n\n",
                "event: message\ndata: {\"content\":\"two\",\"session_id\":\"s1\"}\n\n",
            ]),
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(
            sink.calls,
            vec![
                "content:one",
                "event:tool_call",
                "content:two",
                "session:s1"
            ]
        );
        assert_eq!(sink.session_ids, vec!["s1".to_string()]);
    }
}
