use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric identifier of a chat thread.
pub type ConversationId = i64;

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sender {
    User,
    Bot,
}

/// A document chunk the answer was grounded on.
///
/// The response stream encodes the fields in snake case while chat history
/// uses camel case; both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    #[serde(alias = "file_name")]
    pub file_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(alias = "page_number", default)]
    pub page_number: i64,
    #[serde(default)]
    pub snippet: String,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceDocument>>,
    /// For bot messages this marks when the response finished streaming,
    /// not when the placeholder was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    /// A user message stamped with the current time.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
            sources: None,
            created_at: Some(Utc::now()),
        }
    }

    /// An empty bot message to be filled by a response stream.
    #[must_use]
    pub fn bot_placeholder() -> Self {
        Self {
            sender: Sender::Bot,
            text: String::new(),
            sources: None,
            created_at: None,
        }
    }

    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.sender == Sender::Bot
    }
}

/// A chat thread as returned by `GET /chats` and `GET /chats/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSummary {
    pub id: ConversationId,
    pub member_email: Option<String>,
    pub title: Option<String>,
    pub last_message_preview: Option<String>,
    #[serde(alias = "isArchived")]
    pub archived: bool,
    pub messages: Option<Vec<HistoryMessage>>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl ChatSummary {
    /// Converts the server history into ledger messages, in sequence order.
    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        let mut history = self.messages.unwrap_or_default();
        history.sort_by_key(|message| message.sequence.unwrap_or(i64::MAX));
        history
            .into_iter()
            .map(HistoryMessage::into_message)
            .collect()
    }
}

/// A persisted message as returned inside [`ChatSummary::messages`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<ConversationId>,
    pub sender: Sender,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub sequence: Option<i64>,
    #[serde(default)]
    pub sources: Option<Vec<SourceDocument>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl HistoryMessage {
    #[must_use]
    pub fn into_message(self) -> Message {
        let text = match self.content {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Message {
            sender: self.sender,
            text,
            sources: self.sources.filter(|sources| !sources.is_empty()),
            created_at: self.created_at,
        }
    }
}

/// Body of `POST /auth/sign-in`.
#[derive(Debug, Clone, Serialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Body returned by sign-in and refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthResponse {
    pub access_token: Option<String>,
    pub id: Option<i64>,
    pub email: Option<String>,
    pub role: Option<String>,
    #[serde(alias = "lastLoginAt")]
    pub last_sign_in_at: Option<String>,
}

/// Body of `POST /chats/{id}/message`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Error envelope the server attaches to non-OK responses.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub(crate) struct ErrorBody {
    pub message: Option<String>,
}
