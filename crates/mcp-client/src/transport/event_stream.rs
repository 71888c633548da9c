//! Incremental `text/event-stream` decoding.

use crate::protocol::JsonRpcResponse;

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Events without a name default to `message`.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Byte-level decoder; chunks may split events (and UTF-8 sequences) anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..end])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&rest))
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => data.push(value),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data.is_empty() && event.event.is_none() {
        return None;
    }
    event.data = data.join("\n");
    Some(event)
}

/// The JSON-RPC response for request `id` carried by `event`, if any.
pub(crate) fn response_for(event: &SseEvent, id: u64) -> Option<JsonRpcResponse> {
    if !event.is_message() {
        return None;
    }
    serde_json::from_str::<JsonRpcResponse>(&event.data)
        .ok()
        .filter(|resp| resp.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"event: endpoint\r\nda").is_empty());
        let events = decoder.feed(b"ta: /messages?session=1\r\n\r\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("endpoint"));
        assert_eq!(events[0].data, "/messages?session=1");
        assert!(events[1].is_message());
        assert_eq!(events[1].data, "{\"a\":1}");
    }

    #[test]
    fn multi_line_data_and_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b": keep-alive\n\ndata: one\ndata: two\nid: 7\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}").is_empty());
        let event = decoder.finish().unwrap();
        assert!(response_for(&event, 3).is_some());
        assert!(response_for(&event, 4).is_none());
    }

    #[test]
    fn named_events_are_not_responses() {
        let event = SseEvent {
            event: Some("endpoint".into()),
            data: r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.into(),
            id: None,
        };
        assert!(response_for(&event, 1).is_none());
    }
}
