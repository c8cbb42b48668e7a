use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::EnumString;

/// Who produced a message in the conversation view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    User,
    Server,
}

/// A single displayed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
        }
    }

    pub fn server(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Server,
        }
    }
}

/// State of the streaming connection for the active conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Kind of node output delivered on the event feed.
///
/// The platform emits one event per executed flow node; only answer nodes
/// carry text destined for the message list.
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Answer,
    Question,
    Retriever,
    Llm,
    #[strum(default)]
    Other(String),
}

/// Decoded event from the server feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Keepalive; payload is ignored
    Heartbeat,
    /// Server assigned or changed the conversation title
    TitleUpdate { title: String },
    /// Output of a flow node
    NodeOutput { kind: NodeKind, message: String },
}

#[derive(Debug, Deserialize)]
struct TitlePayload {
    title: String,
}

#[derive(Debug, Deserialize)]
struct NodePayload {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

impl StreamEvent {
    /// Decode a named feed event. Returns `Ok(None)` for event names this
    /// client does not handle.
    pub fn decode(name: &str, data: &str) -> Result<Option<Self>> {
        match name {
            "heartbeat" => Ok(Some(StreamEvent::Heartbeat)),
            "title" => {
                let payload: TitlePayload = serde_json::from_str(data)
                    .context("Failed to parse title event payload")?;
                Ok(Some(StreamEvent::TitleUpdate {
                    title: payload.title,
                }))
            }
            "node" => {
                let payload: NodePayload = serde_json::from_str(data)
                    .context("Failed to parse node event payload")?;
                let kind = NodeKind::from_str(&payload.kind)
                    .unwrap_or_else(|_| NodeKind::Other(payload.kind.clone()));
                Ok(Some(StreamEvent::NodeOutput {
                    kind,
                    message: payload.message,
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Events delivered from the feed task to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The stream connection is open
    Open,
    /// A decoded server event
    Event(StreamEvent),
    /// The connection dropped; the feed task will retry on its own
    Closed(String),
}
