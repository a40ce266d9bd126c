// Chat REST backend
// History loading (GET /api/chat/{userId}/{peerId}), message persistence
// (POST /api/chat/send) and the list of accepted connections to chat with.

use async_trait::async_trait;
use log::{debug, error, info};
use serde::Deserialize;
use url::Url;

use crate::error::ChatError;
use crate::models::{Contact, Message, User};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Durable message log between `user_a` and `user_b`.
    ///
    /// An empty result means "no prior messages", not an error.
    async fn load_history(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, ChatError>;

    /// Persist one message.
    async fn persist_message(&self, message: &Message) -> Result<(), ChatError>;

    /// Peers `username` has an accepted connection with.
    async fn contacts(&self, username: &str) -> Result<Vec<Contact>, ChatError>;
}

pub struct RestClient {
    base_url: Url,
    http: reqwest::Client,
}

// Shape of GET /api/connections/requests/{username}
#[derive(Debug, Deserialize)]
struct ConnectionRequests {
    #[serde(default)]
    requests: Vec<ConnectionRequest>,
}

#[derive(Debug, Deserialize)]
struct ConnectionRequest {
    sender: User,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl RestClient {
    pub fn new(base_url: &str) -> Result<Self, ChatError> {
        let base_url = Url::parse(base_url).map_err(|e| ChatError::Config(format!("invalid base url '{}': {}", base_url, e)))?;
        Ok(Self { base_url, http: reqwest::Client::new() })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChatError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChatError::Config(format!("base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn checked(url: &Url, response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            error!("{} answered {}", url, status);
            Err(ChatError::Fetch { url: url.to_string(), status: status.as_u16() })
        }
    }
}

#[async_trait]
impl ChatBackend for RestClient {
    async fn load_history(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, ChatError> {
        let url = self.endpoint(&["api", "chat", user_a, user_b])?;
        debug!("Fetching history from {}", url);

        let response = self.http.get(url.clone()).send().await?;
        let messages: Vec<Message> = Self::checked(&url, response).await?.json().await?;

        info!("Loaded {} historical messages for {} and {}", messages.len(), user_a, user_b);
        Ok(messages)
    }

    async fn persist_message(&self, message: &Message) -> Result<(), ChatError> {
        let url = self.endpoint(&["api", "chat", "send"])?;
        let response = self.http.post(url.clone()).json(message).send().await?;
        Self::checked(&url, response).await?;

        debug!("Persisted message {} -> {} at {}", message.sender_id, message.receiver_id, message.created_at);
        Ok(())
    }

    async fn contacts(&self, username: &str) -> Result<Vec<Contact>, ChatError> {
        let url = self.endpoint(&["api", "connections", "requests", username])?;
        let response = self.http.get(url.clone()).send().await?;
        let body: ConnectionRequests = Self::checked(&url, response).await?.json().await?;

        Ok(accepted_contacts(body))
    }
}

fn accepted_contacts(body: ConnectionRequests) -> Vec<Contact> {
    body.requests
        .into_iter()
        .filter(|request| request.status == "accepted")
        .map(|request| Contact {
            id: request.sender.id,
            username: request.sender.username,
            last_message: request.message,
        })
        .collect()
}
