use crate::error::ChatError;
use crate::events::{RoomId, SessionEvent};
use crate::session::RoomSessionController;
use crate::ui::conversation::{
    ExchangeStatus, HistoryStatus, ParsedCommand, SlashCommand, get_help_text, parse_slash_command,
};
use anyhow::{Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Actions that can be requested by the conversation manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationAction {
    None,
    Exit,
}

/// Line-oriented front end over a room session.
///
/// Reads input and applies session events concurrently, so room switches and
/// `/stop` take effect while a reply is still streaming.
pub struct ConversationManager<W: Write> {
    session: RoomSessionController,
    out: W,
    /// Bytes of the streaming reply already written
    printed: usize,
    reply_open: bool,
}

impl<W: Write> ConversationManager<W> {
    pub fn new(session: RoomSessionController, out: W) -> Self {
        Self {
            session,
            out,
            printed: 0,
            reply_open: false,
        }
    }

    /// Interactive loop until `/quit` or end of input.
    ///
    /// At end of input the reply in flight, if any, is still awaited.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        self.session.mount().await;
        self.print_rooms()?;
        writeln!(self.out, "Type a message, or /help for commands.")?;

        let mut lines = input.lines();
        let mut input_open = true;

        loop {
            if !input_open && !self.session.has_pending_work() {
                break;
            }

            tokio::select! {
                line = lines.next_line(), if input_open => {
                    match line.context("Failed to read input")? {
                        Some(line) => {
                            if self.handle_line(&line).await? == ConversationAction::Exit {
                                break;
                            }
                        }
                        None => input_open = false,
                    }
                }
                Some(event) = self.session.next_event(), if self.session.has_pending_work() => {
                    self.render_event(event)?;
                }
                else => break,
            }
        }

        self.end_reply()?;
        self.out.flush()?;
        Ok(())
    }

    /// Send one message and stream the reply. Returns the room it ended up in.
    pub async fn send(&mut self, room: Option<RoomId>, text: &str) -> Result<Option<RoomId>> {
        match room {
            Some(room) => self.session.select_room(Some(room)).await,
            None => self.session.mount().await,
        }

        self.submit(text)?;
        while let Some(event) = self.session.next_event().await {
            self.render_event(event)?;
        }
        self.end_reply()?;
        self.out.flush()?;

        Ok(self.session.current_room())
    }

    /// Handle one line of user input
    pub async fn handle_line(&mut self, line: &str) -> Result<ConversationAction> {
        if let Some(command) = parse_slash_command(line) {
            return self.handle_slash_command(command).await;
        }
        if line.trim().is_empty() {
            return Ok(ConversationAction::None);
        }

        match self.submit(line) {
            Ok(()) => {}
            Err(e) => match e.downcast_ref::<ChatError>() {
                Some(ChatError::Busy) => {
                    writeln!(self.out, "(still answering, /stop to interrupt)")?;
                }
                _ => writeln!(self.out, "(not sent: {})", e)?,
            },
        }
        Ok(ConversationAction::None)
    }

    fn submit(&mut self, text: &str) -> Result<()> {
        self.session.submit(text)?;
        self.printed = 0;
        self.reply_open = true;
        write!(self.out, "AI: ")?;
        self.out.flush()?;
        Ok(())
    }

    /// Handle slash commands
    async fn handle_slash_command(&mut self, command: ParsedCommand) -> Result<ConversationAction> {
        match command.command {
            SlashCommand::Rooms => {
                self.session.refresh_directory().await;
                self.print_rooms()?;
            }
            SlashCommand::Open => match command.room_target() {
                Some(room_id) => {
                    self.end_reply()?;
                    self.session.select_room(Some(room_id)).await;
                    self.print_history()?;
                }
                None => writeln!(self.out, "Usage: /open <room_id>")?,
            },
            SlashCommand::New => {
                self.end_reply()?;
                self.session.select_room(None).await;
                writeln!(self.out, "New chat. A room is created when you send the first message.")?;
            }
            SlashCommand::Stop => {
                if self.session.cancel() {
                    self.end_reply()?;
                    writeln!(self.out, "(stopped)")?;
                } else if self.session.has_pending_work() {
                    writeln!(self.out, "(reply already finished, saving the new room)")?;
                } else {
                    writeln!(self.out, "(nothing to stop)")?;
                }
            }
            SlashCommand::Help => {
                writeln!(self.out, "{}", get_help_text())?;
            }
            SlashCommand::Quit => return Ok(ConversationAction::Exit),
        }
        Ok(ConversationAction::None)
    }

    fn render_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::StreamOpened { .. } => {}
            SessionEvent::Snapshot { content, .. } => {
                // snapshots only ever extend, so only the new tail is written
                let delta = content.get(self.printed..).unwrap_or(&content);
                write!(self.out, "{}", delta)?;
                self.out.flush()?;
                self.printed = content.len();
            }
            SessionEvent::StreamCompleted { .. } => {
                self.end_reply()?;
            }
            SessionEvent::StreamFailed { error, .. } => {
                self.end_reply()?;
                writeln!(self.out, "(reply incomplete: {}; send again to retry)", error)?;
            }
            SessionEvent::RoomCreated { room_id } => {
                writeln!(self.out, "(saved as room {})", room_id)?;
            }
            SessionEvent::RoomResolutionFailed => {
                writeln!(
                    self.out,
                    "(could not find the new room; your next message starts another one)"
                )?;
            }
        }
        Ok(())
    }

    fn end_reply(&mut self) -> Result<()> {
        if self.reply_open {
            writeln!(self.out)?;
            self.reply_open = false;
            self.printed = 0;
        }
        Ok(())
    }

    /// Print the cached room directory
    pub fn print_rooms(&mut self) -> Result<()> {
        let current = self.session.current_room();
        let untitled = self.session.config().untitled_label.clone();
        let directory = self.session.directory();
        let rooms = directory.cached();

        if directory.is_loading() {
            writeln!(self.out, "(loading rooms...)")?;
        }
        if rooms.is_empty() {
            writeln!(self.out, "No conversations yet. Send a message to start one.")?;
            return Ok(());
        }

        match directory.last_refresh() {
            Some(at) => writeln!(
                self.out,
                "Your rooms (as of {}):",
                at.with_timezone(&chrono::Local).format("%H:%M:%S")
            )?,
            None => writeln!(self.out, "Your rooms:")?,
        }
        for room in rooms {
            let marker = if current.as_ref() == Some(&room.room_id) { "*" } else { " " };
            writeln!(
                self.out,
                "{} {}  {}",
                marker,
                room.room_id,
                room.display_title(&untitled)
            )?;
        }
        Ok(())
    }

    /// Print the message log of the selected room
    pub fn print_history(&mut self) -> Result<()> {
        let log = self.session.log();
        if log.history_status() == HistoryStatus::Unavailable {
            writeln!(self.out, "(history could not be loaded)")?;
            return Ok(());
        }
        if log.is_empty() {
            writeln!(self.out, "(no messages yet)")?;
            return Ok(());
        }
        for (index, message) in log.messages().iter().enumerate() {
            let marker = match log.status_at(index) {
                Some(ExchangeStatus::Incomplete) => " [incomplete]",
                _ => "",
            };
            writeln!(
                self.out,
                "{}: {}{}",
                message.role.display_name(),
                message.content,
                marker
            )?;
        }
        Ok(())
    }

    pub fn session(&self) -> &RoomSessionController {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut RoomSessionController {
        &mut self.session
    }

    pub fn into_output(self) -> W {
        self.out
    }
}
