use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ChatError;

/// Opaque room identifier assigned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted conversation thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    #[serde(default)]
    pub title: Option<String>,
}

impl Room {
    pub fn new(room_id: impl Into<String>, title: Option<String>) -> Self {
        Self {
            room_id: RoomId::new(room_id),
            title,
        }
    }

    /// Title to show, falling back to `untitled` when the server has not named the room yet
    pub fn display_title<'a>(&'a self, untitled: &'a str) -> &'a str {
        self.title.as_deref().unwrap_or(untitled)
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            MessageRole::User => "You",
            MessageRole::Assistant => "AI",
        }
    }
}

/// One exchanged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST chat`. A `None` room asks the backend to create one.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub room_id: Option<RoomId>,
    pub message: String,
}

/// Identifies one submission and everything its stream produces
pub type ExchangeId = uuid::Uuid;

/// Where a stream failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// No response stream was obtained
    Open,
    /// The stream broke after it started
    MidStream,
}

/// Notifications emitted by the room session controller for its owner
#[derive(Debug)]
pub enum SessionEvent {
    /// The chat stream was obtained and snapshots will follow
    StreamOpened { exchange: ExchangeId },

    /// The trailing assistant message grew to `content`
    Snapshot { exchange: ExchangeId, content: String },

    /// The stream ended normally
    StreamCompleted { exchange: ExchangeId },

    /// The stream could not be opened or broke mid-way; partial content is kept
    StreamFailed {
        exchange: ExchangeId,
        stage: FailureStage,
        error: ChatError,
    },

    /// A null-room submission was resolved to the room the backend created
    RoomCreated { room_id: RoomId },

    /// The post-stream directory requery produced nothing usable
    RoomResolutionFailed,
}
