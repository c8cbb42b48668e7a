//! The conversation session controller.
//!
//! `ChatSession` owns everything the chat surface displays: the ordered
//! message list, the conversation title, the connection flag, and the cached
//! conversation list. All mutation goes through its transition methods, so
//! optimistic local state and server-confirmed state cannot drift apart
//! behind its back.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::mpsc;

use crate::api::{ChatCreated, ChatDetail, ChatSummary};
use crate::events::{ConnectionState, FeedEvent, Message, NodeKind, StreamEvent};
use crate::transcript;

/// Title shown until the server assigns one
pub const DEFAULT_TITLE: &str = "New conversation";

/// Placeholder text for an answer that has not arrived yet
pub const PENDING_TEXT: &str = "…";

/// Backend operations the session depends on.
///
/// The real implementation is `ApiClient`; tests drive the session against a
/// recording mock.
pub trait ChatBackend {
    async fn create_chat(&self, flow_id: &str) -> Result<ChatCreated>;
    async fn send_message(&self, chat_id: i64, message: &str) -> Result<()>;
    async fn fetch_chat(&self, flow_id: &str, chat_id: i64) -> Result<ChatDetail>;
    async fn list_chats(&self, flow_id: &str) -> Result<Vec<ChatSummary>>;
    fn open_feed(&self, token: &str) -> mpsc::Receiver<FeedEvent>;
}

/// Session controller for one chat flow
pub struct ChatSession<B: ChatBackend> {
    backend: B,
    flow_id: String,
    chat_id: Option<i64>,
    title: String,
    connection: ConnectionState,
    messages: Vec<Message>,
    /// Positions of placeholders awaiting an answer, oldest first. Answer
    /// events finalize the front entry in place rather than blindly
    /// rewriting the last message, so two in-flight questions cannot
    /// corrupt each other. The feed carries no answer identifiers, so
    /// position order is the only correlation available.
    pending: VecDeque<usize>,
    /// Message typed before a conversation existed, waiting for the feed
    queued: Option<String>,
    /// Cached sidebar list, refreshed on title events
    chats: Vec<ChatSummary>,
    feed: Option<mpsc::Receiver<FeedEvent>>,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl<B: ChatBackend> ChatSession<B> {
    pub fn new(backend: B, flow_id: impl Into<String>) -> Self {
        Self {
            backend,
            flow_id: flow_id.into(),
            chat_id: None,
            title: DEFAULT_TITLE.to_string(),
            connection: ConnectionState::Disconnected,
            messages: Vec::new(),
            pending: VecDeque::new(),
            queued: None,
            chats: Vec::new(),
            feed: None,
            last_heartbeat: None,
        }
    }

    /// Send a message, creating the conversation first if none exists.
    ///
    /// Without a conversation (or before the feed is connected) the text is
    /// queued and dispatched once the new feed reports open.
    pub async fn send_message(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        match self.chat_id {
            Some(chat_id) if self.connection == ConnectionState::Connected => {
                self.dispatch(chat_id, text).await
            }
            _ => {
                self.queued = Some(text.to_string());
                self.start_conversation().await
            }
        }
    }

    /// Create a conversation and open its event feed.
    ///
    /// Replacing the feed receiver supersedes any previous connection: the
    /// old task finds its channel closed and exits.
    pub async fn start_conversation(&mut self) -> Result<()> {
        let created = match self.backend.create_chat(&self.flow_id).await {
            Ok(created) => created,
            Err(e) => {
                // Failed creation abandons whatever was waiting to be sent
                self.queued = None;
                return Err(e);
            }
        };

        self.chat_id = Some(created.id);
        self.title = DEFAULT_TITLE.to_string();
        self.feed = Some(self.backend.open_feed(&created.stream_token));
        self.connection = ConnectionState::Connecting;

        Ok(())
    }

    /// Reset the visible state and create a fresh conversation
    pub async fn start_new_conversation(&mut self) -> Result<()> {
        self.messages.clear();
        self.pending.clear();
        self.queued = None;
        self.chat_id = None;
        self.title = DEFAULT_TITLE.to_string();
        self.start_conversation().await
    }

    /// Switch to a stored conversation, replacing the entire message list
    /// with its parsed transcript. Fetch or parse failure leaves the current
    /// list untouched.
    pub async fn select_conversation(&mut self, chat_id: i64) -> Result<()> {
        let detail = self.backend.fetch_chat(&self.flow_id, chat_id).await?;
        let messages = transcript::parse_message_list(&detail.message_list)?;

        self.chat_id = Some(chat_id);
        self.messages = messages;
        self.title = detail.title.unwrap_or_else(|| DEFAULT_TITLE.to_string());
        self.pending.clear();
        self.queued = None;

        Ok(())
    }

    /// Wait for the next event from the feed task. Pends forever while no
    /// feed is open, which makes it safe to park in a select loop.
    pub async fn next_feed_event(&mut self) -> Option<FeedEvent> {
        match &mut self.feed {
            Some(rx) => rx.recv().await,
            None => futures::future::pending().await,
        }
    }

    /// Apply one feed event to the session state
    pub async fn apply_feed_event(&mut self, event: FeedEvent) -> Result<()> {
        match event {
            FeedEvent::Open => {
                self.connection = ConnectionState::Connected;
                if let Some(text) = self.queued.take() {
                    if let Some(chat_id) = self.chat_id {
                        self.dispatch(chat_id, &text).await?;
                    }
                }
            }
            FeedEvent::Closed(_) => {
                self.connection = ConnectionState::Disconnected;
            }
            FeedEvent::Event(event) => self.apply_stream_event(event).await,
        }

        Ok(())
    }

    async fn apply_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Heartbeat => {
                self.last_heartbeat = Some(Utc::now());
            }
            StreamEvent::TitleUpdate { title } => {
                self.title = title;
                // Stale cache beats no cache; the refresh is best-effort
                if let Ok(chats) = self.backend.list_chats(&self.flow_id).await {
                    self.chats = chats;
                }
            }
            StreamEvent::NodeOutput {
                kind: NodeKind::Answer,
                message,
            } => {
                // Oldest outstanding question gets this answer; an answer
                // with nothing outstanding is dropped
                if let Some(index) = self.pending.pop_front() {
                    if let Some(slot) = self.messages.get_mut(index) {
                        *slot = Message::server(message);
                    }
                }
            }
            StreamEvent::NodeOutput { .. } => {}
        }
    }

    /// Append the user message and its placeholder, then issue the send.
    /// A failed send removes the placeholder so no orphan survives.
    async fn dispatch(&mut self, chat_id: i64, text: &str) -> Result<()> {
        self.messages.push(Message::user(text));
        self.messages.push(Message::server(PENDING_TEXT));
        self.pending.push_back(self.messages.len() - 1);

        if let Err(e) = self.backend.send_message(chat_id, text).await {
            self.pending.pop_back();
            self.messages.pop();
            return Err(e);
        }

        Ok(())
    }

    /// Fetch the conversation list into the cache
    pub async fn refresh_chats(&mut self) -> Result<&[ChatSummary]> {
        self.chats = self.backend.list_chats(&self.flow_id).await?;
        Ok(&self.chats)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.chat_id
    }

    #[allow(dead_code)]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Number of questions still waiting for their answer
    #[allow(dead_code)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[allow(dead_code)]
    pub fn chats(&self) -> &[ChatSummary] {
        &self.chats
    }

    /// When the feed last reported a heartbeat, if it ever has
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat
    }
}
