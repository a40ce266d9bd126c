use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A platform user as seen by the chat layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
}

/// An accepted connection, i.e. somebody the local user can chat with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub username: String,
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(rename = "message")]
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// Backend-assigned id when the backend sends one. Never used for identity.
    #[serde(rename = "_id", alias = "id", default, skip_serializing)]
    pub id: Option<String>,
    #[serde(skip)]
    pub delivery_status: DeliveryStatus,
}

/// Local delivery state. Never sent over the wire.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum DeliveryStatus {
    /// Received from the backend (history or push)
    #[default]
    Unknown,
    /// Sent locally, not yet persisted
    Sending,
    Stored,
    /// Persisting failed, never pushed
    Failed,
}

/// Composite identity of a message. There is no guaranteed server id, so two
/// messages are the same if sender, receiver, timestamp and body all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub sender_id: String,
    pub receiver_id: String,
    pub created_at: DateTime<Utc>,
    pub body: String,
}

/// Unordered pair of participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl Message {
    pub fn new(sender_id: &str, receiver_id: &str, body: &str, created_at: DateTime<Utc>) -> Self {
        Message {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            body: body.to_string(),
            created_at,
            id: None,
            delivery_status: DeliveryStatus::Unknown,
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            created_at: self.created_at,
            body: self.body.clone(),
        }
    }

    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(&self.sender_id, &self.receiver_id)
    }

    /// The participant that isn't `local_user_id`.
    pub fn peer_of(&self, local_user_id: &str) -> &str {
        if self.sender_id == local_user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            ConversationKey { low: a.to_string(), high: b.to_string() }
        } else {
            ConversationKey { low: b.to_string(), high: a.to_string() }
        }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.low == user_id || self.high == user_id
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}
