//! Server-sent events transport for the conversation feed.
//!
//! The platform pushes conversation updates over `GET /sse/connect` as named
//! SSE events. The parser here is incremental so it survives chunk boundaries
//! falling anywhere, including mid-line. Reconnection lives in the feed task;
//! the session only observes `Open`/`Closed` transitions.

use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::events::{FeedEvent, StreamEvent};

/// A raw SSE event before payload decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub data: String,
}

const DEFAULT_EVENT_NAME: &str = "message";

/// Incremental parser for a `text/event-stream` body
pub struct SseParser {
    /// Incomplete UTF-8 tail carried over from the previous byte chunk
    undecoded: Vec<u8>,
    /// Partial line carried over from the previous chunk
    partial: String,
    event_name: String,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            undecoded: Vec::new(),
            partial: String::new(),
            event_name: DEFAULT_EVENT_NAME.to_string(),
            data_lines: Vec::new(),
        }
    }

    /// Feed a raw byte chunk, returning any events completed by it.
    ///
    /// Chunk boundaries can fall inside a multi-byte character; the
    /// incomplete tail is held back until the rest arrives.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        self.undecoded.extend_from_slice(chunk);

        let text = match std::str::from_utf8(&self.undecoded) {
            Ok(valid) => {
                let text = valid.to_owned();
                self.undecoded.clear();
                text
            }
            // A truncated final character is kept for the next chunk
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.undecoded[..valid]).into_owned();
                self.undecoded.drain(..valid);
                text
            }
            // Genuinely invalid bytes become replacement characters
            Err(_) => {
                let text = String::from_utf8_lossy(&self.undecoded).into_owned();
                self.undecoded.clear();
                text
            }
        };

        self.push(&text)
    }

    /// Feed a chunk of stream text, returning any events completed by it
    pub fn push(&mut self, chunk: &str) -> Vec<RawEvent> {
        let mut events = Vec::new();

        self.partial.push_str(chunk);
        while let Some(newline_pos) = self.partial.find('\n') {
            let mut line = self.partial[..newline_pos].to_string();
            self.partial = self.partial[newline_pos + 1..].to_string();

            if line.ends_with('\r') {
                line.pop();
            }

            if let Some(event) = self.handle_line(&line) {
                events.push(event);
            }
        }

        events
    }

    fn handle_line(&mut self, line: &str) -> Option<RawEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment lines keep the connection alive and carry nothing
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_name = value.to_string(),
            "data" => self.data_lines.push(value.to_string()),
            // `id` and `retry` are not used by this client
            _ => {}
        }

        None
    }

    /// Dispatch the buffered event, if any. Per the SSE processing model an
    /// empty data buffer means no event is fired.
    fn dispatch(&mut self) -> Option<RawEvent> {
        let name = std::mem::replace(&mut self.event_name, DEFAULT_EVENT_NAME.to_string());

        if self.data_lines.is_empty() {
            return None;
        }

        let data = self.data_lines.join("\n");
        self.data_lines.clear();

        Some(RawEvent { name, data })
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection parameters for the event feed
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub base_url: String,
    pub token: String,
    pub reconnect_delay: Duration,
}

/// Open the event feed, spawning a task that keeps the connection alive.
///
/// Events arrive on the returned channel. When the connection drops, a
/// `Closed` event is delivered and the task retries after the configured
/// delay. Dropping the receiver ends the task at its next send.
pub fn connect(client: reqwest::Client, config: FeedConfig) -> mpsc::Receiver<FeedEvent> {
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        loop {
            let reason = match run_connection(&client, &config, &tx).await {
                Ok(()) => "stream ended".to_string(),
                Err(e) => e.to_string(),
            };

            if tx.send(FeedEvent::Closed(reason)).await.is_err() {
                // Receiver is gone; the session moved on
                return;
            }

            tokio::time::sleep(config.reconnect_delay).await;
        }
    });

    rx
}

/// Run a single connection until the stream ends or fails
async fn run_connection(
    client: &reqwest::Client,
    config: &FeedConfig,
    tx: &mpsc::Sender<FeedEvent>,
) -> Result<()> {
    let url = format!("{}/sse/connect", config.base_url);

    let response = client
        .get(&url)
        .header("Authorization", format!("Bearer {}", config.token))
        .header("Accept", "text/event-stream")
        .send()
        .await
        .context("Failed to open event feed")?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(anyhow!("Event feed rejected ({}): {}", status, error_text));
    }

    if tx.send(FeedEvent::Open).await.is_err() {
        return Ok(());
    }

    let mut stream = response.bytes_stream();
    let mut parser = SseParser::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Event feed read failed")?;

        for raw in parser.push_bytes(&chunk) {
            // Unparseable payloads are skipped rather than killing the feed
            if let Ok(Some(event)) = StreamEvent::decode(&raw.name, &raw.data) {
                if tx.send(FeedEvent::Event(event)).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NodeKind;

    fn raw(name: &str, data: &str) -> RawEvent {
        RawEvent {
            name: name.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn parses_named_event() {
        let mut parser = SseParser::new();
        let events = parser.push("event: title\ndata: {\"title\":\"hi\"}\n\n");
        assert_eq!(events, vec![raw("title", "{\"title\":\"hi\"}")]);
    }

    #[test]
    fn survives_chunk_split_mid_line() {
        let mut parser = SseParser::new();
        assert!(parser.push("event: node\nda").is_empty());
        let events = parser.push("ta: {\"x\":1}\n\n");
        assert_eq!(events, vec![raw("node", "{\"x\":1}")]);
    }

    #[test]
    fn survives_chunk_split_mid_utf8_character() {
        let mut parser = SseParser::new();
        let bytes = "event: node\ndata: caf\u{e9}\n\n".as_bytes();
        // Split between the two bytes of 'é'
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;

        assert!(parser.push_bytes(&bytes[..split]).is_empty());
        let events = parser.push_bytes(&bytes[split..]);
        assert_eq!(events, vec![raw("node", "caf\u{e9}")]);
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut parser = SseParser::new();
        let mut bytes = b"data: a".to_vec();
        bytes.push(0xFF);
        bytes.extend_from_slice(b"b\n\n");

        let events = parser.push_bytes(&bytes);
        assert_eq!(events, vec![raw("message", "a\u{fffd}b")]);
    }

    #[test]
    fn joins_multi_line_data() {
        let mut parser = SseParser::new();
        let events = parser.push("event: node\ndata: first\ndata: second\n\n");
        assert_eq!(events, vec![raw("node", "first\nsecond")]);
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.push("event: heartbeat\r\ndata: ping\r\n\r\n");
        assert_eq!(events, vec![raw("heartbeat", "ping")]);
    }

    #[test]
    fn skips_comment_lines() {
        let mut parser = SseParser::new();
        let events = parser.push(": keepalive\n\nevent: heartbeat\ndata: 1\n\n");
        assert_eq!(events, vec![raw("heartbeat", "1")]);
    }

    #[test]
    fn blank_separator_without_data_fires_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.push("event: heartbeat\n\n").is_empty());
    }

    #[test]
    fn event_name_resets_between_events() {
        let mut parser = SseParser::new();
        let events = parser.push("event: title\ndata: a\n\ndata: b\n\n");
        assert_eq!(events, vec![raw("title", "a"), raw("message", "b")]);
    }

    #[test]
    fn parsed_events_decode_to_stream_events() {
        let mut parser = SseParser::new();
        let events = parser.push(concat!(
            "event: heartbeat\ndata: ping\n\n",
            "event: node\ndata: {\"type\":\"ANSWER\",\"message\":\"done\"}\n\n",
        ));

        let decoded: Vec<_> = events
            .iter()
            .filter_map(|raw| StreamEvent::decode(&raw.name, &raw.data).unwrap())
            .collect();

        assert_eq!(
            decoded,
            vec![
                StreamEvent::Heartbeat,
                StreamEvent::NodeOutput {
                    kind: NodeKind::Answer,
                    message: "done".to_string()
                },
            ]
        );
    }
}
