//! Message log for the active room

use crate::error::{ChatError, ChatResult};
use crate::events::{Message, MessageRole};

/// State of an assistant message written by an exchange in this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    /// Placeholder appended, still receiving text
    Open,
    /// Stream ended normally
    Complete,
    /// Stream failed to open or broke; whatever arrived is kept
    Incomplete,
}

/// How the log's initial contents were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    /// New chat, nothing to load
    Fresh,
    /// History replayed from the backend
    Loaded,
    /// History fetch failed; the log is empty for that reason
    Unavailable,
}

/// Ordered messages of one room, with in-place updates for the streaming reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLog {
    messages: Vec<Message>,
    /// Parallel to `messages`; `None` for user messages and replayed history
    statuses: Vec<Option<ExchangeStatus>>,
    history: HistoryStatus,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            statuses: Vec::new(),
            history: HistoryStatus::Fresh,
        }
    }

    /// Add a message to the end
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.statuses.push(None);
    }

    /// Provisional write of a submission: the user message plus an empty
    /// assistant placeholder that snapshots will fill in
    pub fn open_exchange(&mut self, text: impl Into<String>) -> ChatResult<()> {
        if self.is_open() {
            return Err(ChatError::Busy);
        }
        self.append(Message::user(text));
        self.messages.push(Message::assistant(String::new()));
        self.statuses.push(Some(ExchangeStatus::Open));
        Ok(())
    }

    /// Replace the content of the trailing assistant message.
    ///
    /// Fails without touching the log when the log is empty or ends with
    /// anything other than an open assistant reply.
    pub fn replace_last(&mut self, content: impl Into<String>) -> ChatResult<()> {
        let Some(last) = self.messages.last_mut() else {
            return Err(ChatError::LogOrder("log is empty".to_string()));
        };
        if last.role != MessageRole::Assistant {
            return Err(ChatError::LogOrder(format!(
                "last message is {:?}, not an assistant reply",
                last.role
            )));
        }
        if self.statuses.last() != Some(&Some(ExchangeStatus::Open)) {
            return Err(ChatError::LogOrder(
                "assistant reply is already closed".to_string(),
            ));
        }
        last.content = content.into();
        Ok(())
    }

    /// Confirm the open reply in place
    pub fn close_exchange(&mut self) {
        self.settle(ExchangeStatus::Complete);
    }

    /// Mark the open reply as failed, keeping its partial content
    pub fn mark_incomplete(&mut self) {
        self.settle(ExchangeStatus::Incomplete);
    }

    fn settle(&mut self, outcome: ExchangeStatus) {
        let open = self
            .statuses
            .last_mut()
            .filter(|status| **status == Some(ExchangeStatus::Open));
        if let Some(status) = open {
            *status = Some(outcome);
        }
    }

    /// Replace everything with a room's replayed history
    pub fn reset(&mut self, messages: Vec<Message>) {
        self.statuses = vec![None; messages.len()];
        self.messages = messages;
        self.history = HistoryStatus::Loaded;
    }

    /// Empty log for a room whose history could not be fetched
    pub fn reset_unavailable(&mut self) {
        self.messages.clear();
        self.statuses.clear();
        self.history = HistoryStatus::Unavailable;
    }

    /// Empty log for a new chat
    pub fn clear(&mut self) {
        self.messages.clear();
        self.statuses.clear();
        self.history = HistoryStatus::Fresh;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Status of the trailing message, if an exchange wrote it
    pub fn exchange_status(&self) -> Option<ExchangeStatus> {
        self.status_at(self.statuses.len().checked_sub(1)?)
    }

    pub fn status_at(&self, index: usize) -> Option<ExchangeStatus> {
        self.statuses.get(index).copied().flatten()
    }

    pub fn history_status(&self) -> HistoryStatus {
        self.history
    }

    pub fn is_open(&self) -> bool {
        self.exchange_status() == Some(ExchangeStatus::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_exchange_appends_pair() {
        let mut log = MessageLog::new();
        log.open_exchange("hello").unwrap();

        assert_eq!(
            log.messages(),
            &[Message::user("hello"), Message::assistant("")]
        );
        assert!(log.is_open());
    }

    #[test]
    fn test_second_open_exchange_rejected() {
        let mut log = MessageLog::new();
        log.open_exchange("one").unwrap();
        assert!(matches!(log.open_exchange("two"), Err(ChatError::Busy)));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_replace_last_does_not_grow() {
        let mut log = MessageLog::new();
        log.reset(vec![Message::user("earlier"), Message::assistant("reply")]);
        log.open_exchange("question").unwrap();
        let len = log.len();

        let snapshots = ["A", "An", "Ans", "Answer"];
        for snapshot in snapshots {
            log.replace_last(snapshot).unwrap();
        }

        assert_eq!(log.len(), len);
        assert_eq!(log.last().unwrap().content, "Answer");
        assert_eq!(log.messages()[1].content, "reply");
    }

    #[test]
    fn test_replace_last_on_empty_log_is_reported() {
        let mut log = MessageLog::new();
        assert!(matches!(log.replace_last("x"), Err(ChatError::LogOrder(_))));
        assert!(log.is_empty());
    }

    #[test]
    fn test_replace_last_on_user_tail_is_reported() {
        let mut log = MessageLog::new();
        log.append(Message::user("hi"));
        assert!(matches!(log.replace_last("x"), Err(ChatError::LogOrder(_))));
        assert_eq!(log.last().unwrap(), &Message::user("hi"));
    }

    #[test]
    fn test_closed_reply_is_immutable() {
        let mut log = MessageLog::new();
        log.open_exchange("q").unwrap();
        log.replace_last("done").unwrap();
        log.close_exchange();

        assert_eq!(log.exchange_status(), Some(ExchangeStatus::Complete));
        assert!(log.replace_last("rewritten").is_err());
        assert_eq!(log.last().unwrap().content, "done");
    }

    #[test]
    fn test_mark_incomplete_keeps_partial() {
        let mut log = MessageLog::new();
        log.open_exchange("q").unwrap();
        log.replace_last("Partial").unwrap();
        log.mark_incomplete();

        assert_eq!(log.exchange_status(), Some(ExchangeStatus::Incomplete));
        assert_eq!(log.last().unwrap().content, "Partial");
        // a failed exchange does not block the next one
        log.open_exchange("retry").unwrap();
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_failed_reply_stays_incomplete_after_retry() {
        let mut log = MessageLog::new();
        log.reset(vec![Message::user("old"), Message::assistant("answer")]);
        log.open_exchange("q").unwrap();
        log.replace_last("Part").unwrap();
        log.mark_incomplete();
        log.open_exchange("q").unwrap();
        log.replace_last("Full answer").unwrap();
        log.close_exchange();

        assert_eq!(log.status_at(1), None);
        assert_eq!(log.status_at(2), None);
        assert_eq!(log.status_at(3), Some(ExchangeStatus::Incomplete));
        assert_eq!(log.messages()[3].content, "Part");
        assert_eq!(log.status_at(5), Some(ExchangeStatus::Complete));
        assert_eq!(log.exchange_status(), Some(ExchangeStatus::Complete));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let history = vec![Message::user("a"), Message::assistant("b")];
        let mut log = MessageLog::new();
        log.open_exchange("in flight").unwrap();

        log.reset(history.clone());
        let first = log.clone();
        log.reset(history);

        assert_eq!(log, first);
        assert!(!log.is_open());
        assert_eq!(log.history_status(), HistoryStatus::Loaded);
    }

    #[test]
    fn test_unavailable_is_distinct_from_empty() {
        let mut empty = MessageLog::new();
        empty.reset(Vec::new());
        let mut failed = MessageLog::new();
        failed.reset_unavailable();

        assert!(empty.is_empty() && failed.is_empty());
        assert_ne!(empty.history_status(), failed.history_status());
    }
}
