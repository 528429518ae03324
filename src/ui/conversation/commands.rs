use std::str::FromStr;

use crate::events::RoomId;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a line with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Refresh and list rooms
    Rooms,
    /// Open an existing room
    Open,
    /// Start a new chat
    New,
    /// Stop the reply being streamed
    Stop,
    /// Show help
    Help,
    /// Exit the application
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// Room named by `/open <room_id>`
    pub fn room_target(&self) -> Option<RoomId> {
        if self.command != SlashCommand::Open {
            return None;
        }
        let arg = self.argument()?.trim();
        (!arg.is_empty()).then(|| RoomId::new(arg))
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Rooms => "refresh and list your rooms",
            SlashCommand::Open => "open a room by id: /open <room_id>",
            SlashCommand::New => "start a new chat (a room is created on first message)",
            SlashCommand::Stop => "stop the reply being streamed",
            SlashCommand::Help => "show available commands",
            SlashCommand::Quit => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Parse a slash command from a line of input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim_start().strip_prefix('/')?;

    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let tail: Vec<&str> = parts.collect();

    let command = SlashCommand::from_str(head)
        .ok()
        .or_else(|| match head.to_lowercase().as_str() {
            "q" | "exit" | "bye" => Some(SlashCommand::Quit),
            "ls" | "list" => Some(SlashCommand::Rooms),
            "o" | "room" => Some(SlashCommand::Open),
            "n" | "new-chat" => Some(SlashCommand::New),
            "cancel" => Some(SlashCommand::Stop),
            "h" | "?" => Some(SlashCommand::Help),
            _ => None,
        })?;

    let argument = if tail.is_empty() {
        None
    } else {
        Some(tail.join(" "))
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for command in SlashCommand::iter() {
        help.push_str(&format!("/{} - {}\n", command.command(), command.description()));
    }

    help.push_str("\nAliases: /q for /quit, /ls for /rooms, /o for /open, /n for /new");
    help.push_str("\nAnything else you type is sent to the current room.");

    help
}
