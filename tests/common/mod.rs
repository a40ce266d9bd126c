// Common test utilities for integration tests
// In-memory stand-ins for the realtime transport and the REST backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::LevelFilter;
use tokio::sync::{mpsc, oneshot};

use mentorchat::chat::protocol::{ClientEvent, ServerEvent};
use mentorchat::chat::{ChatBackend, ChatClient, ChatEvent, Transport, TransportLink};
use mentorchat::models::{Contact, ConversationKey, Message, User};
use mentorchat::{ChatError, Session};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub fn msg(from: &str, to: &str, secs: i64, body: &str) -> Message {
    Message::new(from, to, body, Utc.timestamp_opt(secs, 0).unwrap())
}

pub fn bodies(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.body.as_str()).collect()
}

/// The server end of one in-memory session
pub struct ServerSide {
    pub from_client: mpsc::Receiver<ClientEvent>,
    pub to_client: mpsc::Sender<ServerEvent>,
}

impl ServerSide {
    pub async fn push(&self, message: Message) {
        self.to_client
            .send(ServerEvent::ReceiveMessage(message))
            .await
            .expect("client side of the session is gone");
    }

    pub async fn next_event(&mut self) -> Result<ClientEvent> {
        tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
            .await
            .map_err(|_| anyhow!("Timed out waiting for a client event"))?
            .ok_or_else(|| anyhow!("Client closed the session"))
    }
}

#[derive(Default)]
pub struct MemoryTransport {
    opens: AtomicUsize,
    fail: AtomicBool,
    sessions: Mutex<Vec<ServerSide>>,
}

impl MemoryTransport {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn fail_opens(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Server side of the most recent session
    pub fn take_server(&self) -> ServerSide {
        self.sessions.lock().unwrap().pop().expect("no session was opened")
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<TransportLink, ChatError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("connection refused".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (outbound, from_client) = mpsc::channel(16);
        let (to_client, inbound) = mpsc::channel(16);
        self.sessions.lock().unwrap().push(ServerSide { from_client, to_client });

        Ok(TransportLink { outbound, inbound, task: None })
    }
}

#[derive(Default)]
pub struct MockBackend {
    histories: Mutex<HashMap<ConversationKey, Vec<Message>>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    pub persisted: Mutex<Vec<Message>>,
    pub contacts: Mutex<Vec<Contact>>,
    fail_persist: AtomicBool,
    fail_history: AtomicBool,
}

impl MockBackend {
    pub fn with_history(self, a: &str, b: &str, history: Vec<Message>) -> Self {
        self.histories.lock().unwrap().insert(ConversationKey::new(a, b), history);
        self
    }

    /// Hold the next history fetch involving `peer` until the returned sender fires
    pub fn gate(&self, peer: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(peer.to_string(), rx);
        tx
    }

    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn load_history(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, ChatError> {
        let gate = self.gates.lock().unwrap().remove(user_b);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(ChatError::Fetch { url: format!("/api/chat/{}/{}", user_a, user_b), status: 502 });
        }
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(&ConversationKey::new(user_a, user_b))
            .cloned()
            .unwrap_or_default())
    }

    async fn persist_message(&self, message: &Message) -> Result<(), ChatError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(ChatError::Fetch { url: "/api/chat/send".to_string(), status: 500 });
        }
        self.persisted.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn contacts(&self, _username: &str) -> Result<Vec<Contact>, ChatError> {
        Ok(self.contacts.lock().unwrap().clone())
    }
}

pub fn session_for(id: &str) -> Session {
    Session::logged_in(User { id: id.to_string(), username: format!("{}-name", id) })
}

/// Wait for the next chat event, failing the test instead of hanging
pub async fn next_event(client: &mut ChatClient) -> Result<ChatEvent> {
    tokio::time::timeout(Duration::from_secs(2), client.next_event())
        .await
        .map_err(|_| anyhow!("Timed out waiting for a chat event"))?
        .ok_or_else(|| anyhow!("Chat client event stream ended"))
}
