//! Parsing of stored conversation transcripts.
//!
//! The platform persists a conversation as a JSON-encoded string of
//! question/answer pairs. The schema is validated strictly before any of it
//! reaches the message list.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::events::Message;

/// One exchange in a stored transcript
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscriptEntry {
    pub question: String,
    pub answer: String,
}

/// Parse the JSON-encoded `messageList` of a conversation into the flat,
/// ordered message list the session displays.
pub fn parse_message_list(raw: &str) -> Result<Vec<Message>> {
    let entries: Vec<TranscriptEntry> =
        serde_json::from_str(raw).context("Failed to parse stored transcript")?;

    let mut messages = Vec::with_capacity(entries.len() * 2);
    for entry in entries {
        messages.push(Message::user(entry.question));
        messages.push(Message::server(entry.answer));
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Sender;

    #[test]
    fn parses_single_exchange() {
        let messages = parse_message_list(r#"[{"question":"hi","answer":"hello"}]"#).unwrap();

        assert_eq!(
            messages,
            vec![
                Message {
                    text: "hi".to_string(),
                    sender: Sender::User
                },
                Message {
                    text: "hello".to_string(),
                    sender: Sender::Server
                },
            ]
        );
    }

    #[test]
    fn preserves_exchange_order() {
        let messages = parse_message_list(
            r#"[{"question":"a","answer":"b"},{"question":"c","answer":"d"}]"#,
        )
        .unwrap();

        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn empty_transcript_is_empty_list() {
        assert!(parse_message_list("[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_message_list("[{question").is_err());
    }

    #[test]
    fn unexpected_shape_is_an_error() {
        assert!(parse_message_list(r#"[{"q":"hi","a":"hello"}]"#).is_err());
        assert!(parse_message_list(r#"{"question":"hi","answer":"hello"}"#).is_err());
    }
}
