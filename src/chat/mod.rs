// Direct-message chat for the mentorship platform
// ChatClient is the conversation synchronizer: it owns the realtime session,
// the dispatch filter with the active conversation's store, and the history
// fetches. Every handler runs through `&mut self`, so nothing here needs a lock.

use chrono::{SubsecRound, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod connection;
pub mod dispatch;
pub mod history;
pub mod protocol;
pub mod store;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
pub use dispatch::{DispatchFilter, RouteOutcome, ViewState};
pub use history::{ChatBackend, RestClient};
pub use store::MessageStore;
pub use transport::{SocketIoTransport, Transport, TransportLink};

use crate::error::ChatError;
use crate::models::{Contact, DeliveryStatus, Message, User};
use crate::session::Session;

/// Something the caller should react to (usually by re-rendering).
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A pushed message went through the dispatch filter
    Message { message: Message, outcome: RouteOutcome },
    HistoryLoaded { peer_id: String, count: usize },
    /// The view stays in Loading until the conversation is opened again
    HistoryFailed { peer_id: String, error: String },
}

struct HistoryResult {
    generation: u64,
    peer_id: String,
    result: Result<Vec<Message>, ChatError>,
}

pub struct ChatClient {
    session: Session,
    user: User,
    connection: ConnectionManager,
    backend: Arc<dyn ChatBackend>,
    dispatch: DispatchFilter,
    inbound: mpsc::Receiver<Message>,
    history_tx: mpsc::Sender<HistoryResult>,
    history_rx: mpsc::Receiver<HistoryResult>,
    inflight: Option<JoinHandle<()>>,
}

impl ChatClient {
    pub fn new(session: Session, transport: Arc<dyn Transport>, backend: Arc<dyn ChatBackend>) -> Result<Self, ChatError> {
        let user = session.require_user()?.clone();
        let mut connection = ConnectionManager::new(transport);
        let inbound = connection.on_message()?;
        let (history_tx, history_rx) = mpsc::channel(8);

        Ok(Self {
            session,
            dispatch: DispatchFilter::new(&user.id),
            user,
            connection,
            backend,
            inbound,
            history_tx,
            history_rx,
            inflight: None,
        })
    }

    /// Open the realtime session for the logged-in user. Idempotent.
    pub async fn connect(&mut self) -> Result<(), ChatError> {
        self.session.require_user()?;
        self.connection.open(&self.user.id).await
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn view_state(&self) -> &ViewState {
        self.dispatch.state()
    }

    pub fn active_peer(&self) -> Option<&str> {
        self.dispatch.active_peer()
    }

    /// The active conversation, oldest first.
    pub fn snapshot(&self) -> &[Message] {
        self.dispatch.snapshot()
    }

    pub fn history_error(&self) -> Option<&str> {
        self.dispatch.history_error()
    }

    pub fn unread(&self, peer_id: &str) -> usize {
        self.dispatch.unread(peer_id)
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>, ChatError> {
        self.backend.contacts(&self.user.username).await
    }

    /// Make `peer_id` the active conversation and start loading its history.
    /// Any fetch still running for the previous conversation is abandoned.
    pub fn open_conversation(&mut self, peer_id: &str) -> u64 {
        if let Some(task) = self.inflight.take() {
            debug!("Abandoning in-flight history fetch");
            task.abort();
        }
        let generation = self.dispatch.open(peer_id);

        let backend = self.backend.clone();
        let history_tx = self.history_tx.clone();
        let local_id = self.user.id.clone();
        let peer_id = peer_id.to_string();
        self.inflight = Some(tokio::spawn(async move {
            let result = backend.load_history(&local_id, &peer_id).await;
            // The receiver only goes away with the client
            let _ = history_tx.send(HistoryResult { generation, peer_id, result }).await;
        }));

        generation
    }

    pub fn close_conversation(&mut self) {
        if let Some(task) = self.inflight.take() {
            task.abort();
        }
        self.dispatch.close();
    }

    /// Wait for the next pushed message or history completion and apply it.
    /// Stale history results are swallowed.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        loop {
            tokio::select! {
                Some(done) = self.history_rx.recv() => {
                    if let Some(event) = self.apply_history(done) {
                        return Some(event);
                    }
                }
                Some(message) = self.inbound.recv() => {
                    let outcome = self.dispatch.route(message.clone());
                    return Some(ChatEvent::Message { message, outcome });
                }
                else => return None,
            }
        }
    }

    fn apply_history(&mut self, done: HistoryResult) -> Option<ChatEvent> {
        let HistoryResult { generation, peer_id, result } = done;
        let summary = match &result {
            Ok(history) => Ok(history.len()),
            Err(e) => Err(e.to_string()),
        };
        if !self.dispatch.complete_history(generation, result) {
            return None;
        }
        self.inflight = None;

        Some(match summary {
            Ok(count) => ChatEvent::HistoryLoaded { peer_id, count },
            Err(error) => ChatEvent::HistoryFailed { peer_id, error },
        })
    }

    /// Send `body` to the active peer.
    ///
    /// The message shows up locally as `Sending`, is persisted through the
    /// backend and only then pushed over the realtime channel. If persisting
    /// fails it is marked `Failed` and never pushed.
    pub async fn send(&mut self, body: &str) -> Result<Message, ChatError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let peer_id = self.dispatch.active_peer().ok_or(ChatError::NoActiveConversation)?.to_string();
        if !self.connection.is_connected() {
            warn!("Cannot send to {}: realtime session is {:?}", peer_id, self.connection.state());
            return Err(ChatError::Disconnected);
        }

        // Millisecond precision, the same the backend stores
        let mut message = Message::new(&self.user.id, &peer_id, body, Utc::now().trunc_subsecs(3));
        message.delivery_status = DeliveryStatus::Sending;
        let key = message.key();
        self.dispatch.route(message.clone());

        if let Err(e) = self.backend.persist_message(&message).await {
            warn!("Failed to persist message to {}: {}", peer_id, e);
            self.dispatch.set_status(&key, DeliveryStatus::Failed);
            return Err(e);
        }
        self.dispatch.set_status(&key, DeliveryStatus::Stored);
        message.delivery_status = DeliveryStatus::Stored;

        self.connection.send(&message).await?;
        debug!("Sent message to {}", peer_id);
        Ok(message)
    }

    /// Release the conversation and the realtime session.
    pub fn logout(&mut self) {
        info!("Logging out {}", self.user.username);
        self.close_conversation();
        self.connection.close();
        self.session.logout();
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(task) = self.inflight.take() {
            task.abort();
        }
    }
}
