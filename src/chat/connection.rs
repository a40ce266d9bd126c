// Realtime connection management
// Owns the one live transport session of the logged-in user: open/register,
// close, the single dispatch handler and fire-and-forget sends.

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chat::protocol::{ClientEvent, ServerEvent};
use crate::chat::transport::{Transport, TransportLink};
use crate::error::ChatError;
use crate::models::Message;

/// Enum for representing connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Connecting,
    Error,
}

// State is tagged with the session it belongs to, so a pump task of an old
// session can't overwrite the state of a newer one
#[derive(Debug)]
struct SharedState {
    session: u64,
    state: ConnectionState,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    user_id: Option<String>,
    outbound: Option<mpsc::Sender<ClientEvent>>,
    socket: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    shared: Arc<Mutex<SharedState>>,
    msg_tx: mpsc::Sender<Message>,
    msg_rx: Option<mpsc::Receiver<Message>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(100);
        Self {
            transport,
            user_id: None,
            outbound: None,
            socket: None,
            pump: None,
            shared: Arc::new(Mutex::new(SharedState { session: 0, state: ConnectionState::Disconnected })),
            msg_tx,
            msg_rx: Some(msg_rx),
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_some() && self.state() == ConnectionState::Connected
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Open the session for `user_id` and register the identity with the server.
    ///
    /// Calling this again for the same user while connected is a no-op, so there
    /// is never more than one live session.
    pub async fn open(&mut self, user_id: &str) -> Result<(), ChatError> {
        if self.is_connected() {
            if self.user_id.as_deref() == Some(user_id) {
                debug!("Session for {} already open", user_id);
                return Ok(());
            }
            info!("Switching realtime session from {:?} to {}", self.user_id, user_id);
        }
        // Release whatever is left of a previous session
        self.close();

        let session = {
            let mut shared = lock(&self.shared);
            shared.session += 1;
            shared.state = ConnectionState::Connecting;
            shared.session
        };

        let mut link = match self.transport.open().await {
            Ok(link) => link,
            Err(e) => {
                error!("Failed to open realtime session: {}", e);
                lock(&self.shared).state = ConnectionState::Error;
                return Err(e);
            }
        };

        if link.outbound.send(ClientEvent::RegisterUser(user_id.to_string())).await.is_err() {
            error!("Realtime session closed before registering {}", user_id);
            link.shutdown();
            lock(&self.shared).state = ConnectionState::Error;
            return Err(ChatError::Disconnected);
        }

        // Connected goes in before the pump starts, so an immediate hang-up is
        // still reported as Disconnected
        lock(&self.shared).state = ConnectionState::Connected;
        let TransportLink { outbound, inbound, task } = link;
        self.pump = Some(tokio::spawn(pump_inbound(inbound, self.msg_tx.clone(), self.shared.clone(), session)));
        self.outbound = Some(outbound);
        self.socket = task;
        self.user_id = Some(user_id.to_string());

        info!("Registered {} on the realtime channel", user_id);
        Ok(())
    }

    /// Tear the session down. Safe to call at any time, any number of times.
    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        // Dropping the outbound sender makes the socket task say goodbye and exit,
        // so its handle is only detached here
        self.socket = None;
        if self.outbound.take().is_some() {
            info!("Closed realtime session for {:?}", self.user_id);
        }
        lock(&self.shared).state = ConnectionState::Disconnected;
    }

    /// Hand out the receiver for pushed messages. There is exactly one.
    pub fn on_message(&mut self) -> Result<mpsc::Receiver<Message>, ChatError> {
        self.msg_rx.take().ok_or(ChatError::HandlerAlreadyRegistered)
    }

    /// Push a message to the server. Does not wait for delivery.
    pub async fn send(&self, message: &Message) -> Result<(), ChatError> {
        let outbound = match &self.outbound {
            Some(outbound) if self.state() == ConnectionState::Connected => outbound,
            _ => {
                warn!("Refusing to send to {} while disconnected", message.receiver_id);
                return Err(ChatError::Disconnected);
            }
        };

        outbound
            .send(ClientEvent::SendMessage(message.clone()))
            .await
            .map_err(|_| {
                error!("Realtime session dropped while sending to {}", message.receiver_id);
                ChatError::Disconnected
            })
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock(shared: &Mutex<SharedState>) -> std::sync::MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn pump_inbound(
    mut inbound: mpsc::Receiver<ServerEvent>,
    msg_tx: mpsc::Sender<Message>,
    shared: Arc<Mutex<SharedState>>,
    session: u64,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            ServerEvent::ReceiveMessage(message) => {
                if msg_tx.send(message).await.is_err() {
                    debug!("Message handler dropped, stopping inbound pump");
                    return;
                }
            }
            ServerEvent::Other { name, .. } => debug!("Ignoring realtime event '{}'", name),
        }
    }

    let mut shared = lock(&shared);
    if shared.session == session && shared.state == ConnectionState::Connected {
        warn!("Realtime session {} ended by the transport", session);
        shared.state = ConnectionState::Disconnected;
    }
}
