use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::ChatBackend;
use crate::config::SessionConfig;
use crate::directory::RoomDirectory;
use crate::error::{ChatError, ChatResult};
use crate::events::{ChatRequest, ExchangeId, FailureStage, Room, RoomId, SessionEvent};
use crate::streaming::StreamDecoder;
use crate::ui::conversation::MessageLog;

/// Where the room session is in its submit / stream / resolve cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Room selected (or new chat), nothing sent yet
    Idle(Option<RoomId>),
    /// Request sent, waiting for the response stream
    Submitting,
    /// Snapshots are being applied to the log
    Streaming,
    /// Stream ended for a null-room submission; the stream task is asking the
    /// directory for the new room
    Resolving,
    /// Last exchange settled
    Active(Option<RoomId>),
}

impl SessionState {
    /// Whether an exchange is in flight and new submissions must wait
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Submitting | SessionState::Streaming | SessionState::Resolving
        )
    }
}

/// Message from a stream task back to the session
#[derive(Debug)]
struct StreamUpdate {
    exchange: ExchangeId,
    room: Option<RoomId>,
    kind: UpdateKind,
}

#[derive(Debug)]
enum UpdateKind {
    Opened,
    Snapshot(String),
    Finished,
    Failed(FailureStage, ChatError),
    /// Room list fetched once after a null-room stream finished
    Resolved(ChatResult<Vec<Room>>),
}

/// The exchange the session is currently waiting on
struct OpenExchange {
    id: ExchangeId,
    room: Option<RoomId>,
    cancel: CancellationToken,
}

/// Tags every update from one stream task with its origin
struct UpdateSender {
    tx: mpsc::UnboundedSender<StreamUpdate>,
    exchange: ExchangeId,
    room: Option<RoomId>,
}

impl UpdateSender {
    fn send(&self, kind: UpdateKind) {
        let _ = self.tx.send(StreamUpdate {
            exchange: self.exchange,
            room: self.room.clone(),
            kind,
        });
    }
}

/// Room session controller.
///
/// Owns the message log of the selected room and the room directory. A
/// submission appends the user message and an empty assistant placeholder
/// right away, then a background task reads the chat stream and sends
/// snapshots back through a queue. The owner drains that queue with
/// [`next_event`](Self::next_event), which is where snapshots are applied.
/// Updates from an exchange the session no longer waits on are dropped.
pub struct RoomSessionController {
    backend: Arc<dyn ChatBackend>,
    config: SessionConfig,
    directory: RoomDirectory,
    log: MessageLog,
    state: SessionState,
    exchange: Option<OpenExchange>,
    updates_tx: mpsc::UnboundedSender<StreamUpdate>,
    updates_rx: mpsc::UnboundedReceiver<StreamUpdate>,
}

impl RoomSessionController {
    pub fn new(backend: Arc<dyn ChatBackend>, config: SessionConfig) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        Self {
            directory: RoomDirectory::new(backend.clone()),
            backend,
            config,
            log: MessageLog::new(),
            state: SessionState::Idle(None),
            exchange: None,
            updates_tx,
            updates_rx,
        }
    }

    /// Initial directory load
    pub async fn mount(&mut self) {
        self.directory.list().await;
    }

    /// Switch to `room`, or to a new chat when `None`.
    ///
    /// Any exchange in flight is abandoned: its stream is cancelled when
    /// `cancel_on_switch` is set, and its late updates are ignored either way.
    pub async fn select_room(&mut self, room: Option<RoomId>) {
        self.abandon_exchange();
        self.log.clear();
        self.state = SessionState::Idle(room.clone());
        info!(room = ?room, "room selected");

        if let Some(room_id) = &room {
            match self.backend.room_messages(room_id).await {
                Ok(messages) => {
                    debug!(room = %room_id, count = messages.len(), "history loaded");
                    self.log.reset(messages);
                }
                Err(e) => {
                    warn!(room = %room_id, error = %e, "history fetch failed");
                    self.log.reset_unavailable();
                }
            }
        }

        self.directory.list().await;
    }

    /// Submit `text` to the current room.
    ///
    /// Rejected without touching the log while another exchange is in flight.
    /// Must be called from within a tokio runtime.
    pub fn submit(&mut self, text: &str) -> ChatResult<ExchangeId> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.state.is_busy() || self.exchange.is_some() {
            debug!(state = ?self.state, "submission rejected, exchange in flight");
            return Err(ChatError::Busy);
        }

        let room = self.current_room();
        self.log.open_exchange(text)?;

        let exchange = OpenExchange {
            id: Uuid::new_v4(),
            room: room.clone(),
            cancel: CancellationToken::new(),
        };
        let id = exchange.id;
        info!(exchange = %id, room = ?room, "submitting message");

        let request = ChatRequest {
            room_id: room.clone(),
            message: text.to_string(),
        };
        let sender = UpdateSender {
            tx: self.updates_tx.clone(),
            exchange: id,
            room,
        };
        tokio::spawn(stream_exchange(
            self.backend.clone(),
            request,
            exchange.cancel.clone(),
            sender,
        ));

        self.exchange = Some(exchange);
        self.state = SessionState::Submitting;
        Ok(id)
    }

    /// Apply the next update of the open exchange.
    ///
    /// Returns `None` when there is nothing left to wait for. The network work
    /// happens in the stream task, so dropping the returned future part way
    /// loses nothing.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            self.exchange.as_ref()?;

            let update = self.updates_rx.recv().await?;
            if !self.is_current(&update) {
                debug!(exchange = %update.exchange, "discarding update from abandoned exchange");
                continue;
            }
            return Some(self.apply(update));
        }
    }

    /// Whether [`next_event`](Self::next_event) has anything to wait for
    pub fn has_pending_work(&self) -> bool {
        self.exchange.is_some()
    }

    /// Drive the open exchange to its end, collecting every event
    pub async fn run_to_completion(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    /// Abort the reply being streamed, keeping whatever text already arrived.
    ///
    /// Returns whether anything was stopped. A finished reply whose room is
    /// being resolved is left alone.
    pub fn cancel(&mut self) -> bool {
        if !matches!(self.state, SessionState::Submitting | SessionState::Streaming) {
            return false;
        }
        let Some(exchange) = self.exchange.take() else {
            return false;
        };
        info!(exchange = %exchange.id, "exchange cancelled");
        exchange.cancel.cancel();
        self.log.mark_incomplete();
        self.state = SessionState::Active(exchange.room);
        true
    }

    fn is_current(&self, update: &StreamUpdate) -> bool {
        self.exchange
            .as_ref()
            .is_some_and(|open| open.id == update.exchange && open.room == update.room)
    }

    fn apply(&mut self, update: StreamUpdate) -> SessionEvent {
        let exchange = update.exchange;
        match update.kind {
            UpdateKind::Opened => {
                debug!(exchange = %exchange, "stream opened");
                self.state = SessionState::Streaming;
                SessionEvent::StreamOpened { exchange }
            }
            UpdateKind::Snapshot(content) => {
                self.state = SessionState::Streaming;
                if let Err(e) = self.log.replace_last(content.as_str()) {
                    warn!(exchange = %exchange, error = %e, "snapshot not applied");
                }
                SessionEvent::Snapshot { exchange, content }
            }
            UpdateKind::Finished => {
                self.log.close_exchange();
                info!(exchange = %exchange, "stream completed");

                match update.room {
                    Some(room_id) => {
                        self.exchange = None;
                        self.state = SessionState::Active(Some(room_id));
                    }
                    None => {
                        // the exchange stays open until the room list arrives
                        self.directory.begin_refresh();
                        self.state = SessionState::Resolving;
                    }
                }
                SessionEvent::StreamCompleted { exchange }
            }
            UpdateKind::Resolved(fetched) => {
                self.exchange = None;
                self.resolve_created_room(fetched)
            }
            UpdateKind::Failed(stage, error) => {
                self.log.mark_incomplete();
                let room = self.exchange.take().and_then(|open| open.room);
                warn!(exchange = %exchange, ?stage, error = %error, "stream failed");
                self.state = SessionState::Active(room);
                SessionEvent::StreamFailed {
                    exchange,
                    stage,
                    error,
                }
            }
        }
    }

    /// Learn the id of the room the backend created for a null-room submission.
    ///
    /// Takes the newest room of the one fetch made after the stream ended. This
    /// is a heuristic: a room created elsewhere at the same moment would be
    /// picked up instead.
    fn resolve_created_room(&mut self, fetched: ChatResult<Vec<Room>>) -> SessionEvent {
        self.directory.store(fetched);

        match self.directory.newest().map(|room| room.room_id.clone()) {
            Some(room_id) => {
                info!(room = %room_id, "new room resolved");
                self.state = SessionState::Active(Some(room_id.clone()));
                SessionEvent::RoomCreated { room_id }
            }
            None => {
                warn!("could not resolve the newly created room");
                self.state = SessionState::Active(None);
                SessionEvent::RoomResolutionFailed
            }
        }
    }

    fn abandon_exchange(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            debug!(
                exchange = %exchange.id,
                cancel = self.config.cancel_on_switch,
                "abandoning exchange on room switch"
            );
            if self.config.cancel_on_switch {
                exchange.cancel.cancel();
            }
        }
    }

    /// Room the next submission goes to; `None` creates a room
    pub fn current_room(&self) -> Option<RoomId> {
        match &self.state {
            SessionState::Idle(room) | SessionState::Active(room) => room.clone(),
            _ => self.exchange.as_ref().and_then(|open| open.room.clone()),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Refresh the room list outside of the message flow
    pub async fn refresh_directory(&mut self) {
        self.directory.list().await;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

/// Background read of one chat stream
async fn stream_exchange(
    backend: Arc<dyn ChatBackend>,
    request: ChatRequest,
    cancel: CancellationToken,
    sender: UpdateSender,
) {
    let resolve = request.room_id.is_none();
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        opened = backend.open_chat_stream(request) => opened,
    };

    let source = match opened {
        Ok(source) => source,
        Err(e) => {
            sender.send(UpdateKind::Failed(FailureStage::Open, e));
            return;
        }
    };
    sender.send(UpdateKind::Opened);

    let mut decoder = StreamDecoder::new(source, cancel.clone());
    while let Some(snapshot) = decoder.next_snapshot().await {
        match snapshot {
            Ok(text) => sender.send(UpdateKind::Snapshot(text)),
            Err(ChatError::Cancelled) => return,
            Err(e) => {
                sender.send(UpdateKind::Failed(FailureStage::MidStream, e));
                return;
            }
        }
    }
    sender.send(UpdateKind::Finished);

    if resolve {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            fetched = backend.list_rooms() => fetched,
        };
        sender.send(UpdateKind::Resolved(fetched));
    }
}
