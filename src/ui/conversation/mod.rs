//! Conversation components: the message log and the terminal front end

pub mod commands;
pub mod history;
pub mod manager;

pub use commands::{ParsedCommand, SlashCommand, get_help_text, parse_slash_command};
pub use history::{ExchangeStatus, HistoryStatus, MessageLog};
pub use manager::{ConversationAction, ConversationManager};
