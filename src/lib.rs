//! Streaming chat-room client.
//!
//! The core is [`session::RoomSessionController`]: it submits messages to the
//! conversation backend, applies the streamed reply to the room's
//! [`MessageLog`](ui::conversation::MessageLog) as it arrives, and resolves the
//! room a first message created through the [`directory::RoomDirectory`].

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod session;
pub mod streaming;
pub mod ui;

pub use client::{ChatBackend, HttpBackend};
pub use config::Config;
pub use error::{ChatError, ChatResult};
pub use events::{Message, MessageRole, Room, RoomId, SessionEvent};
pub use session::{RoomSessionController, SessionState};
