// Dispatch filter and conversation view state
// Routes pushed messages into the active conversation and keeps the history
// fetch and live pushes from racing each other.

use log::{debug, info, warn};
use std::collections::HashMap;

use crate::chat::store::MessageStore;
use crate::error::ChatError;
use crate::models::{ConversationKey, DeliveryStatus, Message, MessageKey};

/// State of the single open conversation view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Idle,
    /// History fetch in flight; pushes are buffered
    Loading { peer_id: String, generation: u64 },
    /// History merged; pushes go straight to the store
    Live { peer_id: String },
}

/// What happened to a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Accepted,
    Buffered,
    Duplicate,
    /// Not part of the open conversation
    Dropped,
}

pub struct DispatchFilter {
    local_user_id: String,
    state: ViewState,
    generation: u64,
    store: MessageStore,
    pending: Vec<Message>,
    history_error: Option<String>,
    unread: HashMap<String, usize>,
}

impl DispatchFilter {
    pub fn new(local_user_id: &str) -> Self {
        Self {
            local_user_id: local_user_id.to_string(),
            state: ViewState::Idle,
            generation: 0,
            store: MessageStore::new(),
            pending: Vec::new(),
            history_error: None,
            unread: HashMap::new(),
        }
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn active_peer(&self) -> Option<&str> {
        match &self.state {
            ViewState::Idle => None,
            ViewState::Loading { peer_id, .. } | ViewState::Live { peer_id } => Some(peer_id),
        }
    }

    pub fn active_conversation(&self) -> Option<ConversationKey> {
        self.active_peer().map(|peer| ConversationKey::new(&self.local_user_id, peer))
    }

    /// Switch the view to `peer_id` and return the generation the history result
    /// must carry to be accepted.
    ///
    /// Re-opening the conversation that is already shown keeps what it holds:
    /// buffered pushes and local sends are merged again with the fresh history.
    pub fn open(&mut self, peer_id: &str) -> u64 {
        self.generation += 1;
        if self.active_peer() == Some(peer_id) {
            let mut carried = self.store.snapshot().to_vec();
            carried.append(&mut self.pending);
            debug!("Re-opening {} with {} messages carried over", peer_id, carried.len());
            self.pending = carried;
        } else {
            self.pending.clear();
        }
        self.store.clear();
        self.history_error = None;
        self.unread.remove(peer_id);
        self.state = ViewState::Loading { peer_id: peer_id.to_string(), generation: self.generation };

        info!("Opening conversation with {} (generation {})", peer_id, self.generation);
        self.generation
    }

    /// Back to Idle. Any in-flight history result becomes stale.
    pub fn close(&mut self) {
        if self.state != ViewState::Idle {
            debug!("Closing conversation view");
        }
        self.generation += 1;
        self.store.clear();
        self.pending.clear();
        self.history_error = None;
        self.state = ViewState::Idle;
    }

    /// Apply a finished history fetch. Returns false if the result belongs to a
    /// conversation that is no longer being loaded.
    pub fn complete_history(&mut self, generation: u64, result: Result<Vec<Message>, ChatError>) -> bool {
        let peer_id = match &self.state {
            ViewState::Loading { peer_id, generation: current } if *current == generation => peer_id.clone(),
            _ => {
                debug!("Ignoring stale history result for generation {}", generation);
                return false;
            }
        };

        match result {
            Ok(history) => {
                let conversation = ConversationKey::new(&self.local_user_id, &peer_id);
                let count = history.len();
                // The backend is trusted for the pair, but a misrouted document must
                // not end up in the wrong conversation
                let history = history.into_iter().filter(|m| m.conversation() == conversation).collect::<Vec<_>>();
                if history.len() != count {
                    warn!("History for {} contained {} foreign messages", conversation, count - history.len());
                }
                self.store.seed(history);

                let buffered = std::mem::take(&mut self.pending);
                let merged = buffered.len();
                for message in buffered {
                    self.store.append(message);
                }

                info!("Conversation with {} is live: {} messages, {} merged from buffer", peer_id, self.store.len(), merged);
                self.state = ViewState::Live { peer_id };
            }
            Err(e) => {
                // Stay in Loading; the caller re-opens to retry
                warn!("History fetch for {} failed: {}", peer_id, e);
                self.history_error = Some(e.to_string());
            }
        }
        true
    }

    /// Route one inbound push event.
    pub fn route(&mut self, message: Message) -> RouteOutcome {
        let matches = self
            .active_conversation()
            .map(|active| message.conversation() == active)
            .unwrap_or(false);

        if !matches {
            if message.receiver_id == self.local_user_id {
                *self.unread.entry(message.sender_id.clone()).or_insert(0) += 1;
            }
            debug!("Dropping message {} -> {} outside the open conversation", message.sender_id, message.receiver_id);
            return RouteOutcome::Dropped;
        }

        match self.state {
            ViewState::Loading { .. } => {
                self.pending.push(message);
                RouteOutcome::Buffered
            }
            ViewState::Live { .. } => {
                if self.store.append(message) {
                    RouteOutcome::Accepted
                } else {
                    RouteOutcome::Duplicate
                }
            }
            ViewState::Idle => RouteOutcome::Dropped,
        }
    }

    /// Update the status of a locally sent message, wherever it currently sits.
    pub fn set_status(&mut self, key: &MessageKey, status: DeliveryStatus) -> bool {
        if self.store.set_status(key, status) {
            return true;
        }
        match self.pending.iter_mut().find(|m| &m.key() == key) {
            Some(message) => {
                message.delivery_status = status;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> &[Message] {
        self.store.snapshot()
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn history_error(&self) -> Option<&str> {
        self.history_error.as_deref()
    }

    pub fn unread(&self, peer_id: &str) -> usize {
        self.unread.get(peer_id).copied().unwrap_or(0)
    }
}
