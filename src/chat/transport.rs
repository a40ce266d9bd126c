// Realtime transport: Socket.IO over a WebSocket
// The connection manager only sees channels; the socket task owns the stream,
// answers heartbeats and translates frames in both directions.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use url::Url;

use crate::chat::protocol::{self, ClientEvent, Packet, ServerEvent, CONNECT_FRAME, PONG_FRAME};
use crate::error::ChatError;

/// Channels of one live session. Dropping `outbound` ends the session.
pub struct TransportLink {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub inbound: mpsc::Receiver<ServerEvent>,
    pub task: Option<JoinHandle<()>>,
}

impl TransportLink {
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session. Resolves once the server accepted the connection.
    async fn open(&self) -> Result<TransportLink, ChatError>;
}

pub struct SocketIoTransport {
    endpoint: Url,
    connect_timeout: Duration,
}

impl SocketIoTransport {
    /// `base_url` is the backend root, e.g. `https://api.example.com`.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, ChatError> {
        Ok(Self { endpoint: socket_endpoint(base_url)?, connect_timeout })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Map the backend base url to its Socket.IO WebSocket endpoint.
pub fn socket_endpoint(base_url: &str) -> Result<Url, ChatError> {
    let mut url = Url::parse(base_url).map_err(|e| ChatError::Config(format!("invalid base url '{}': {}", base_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ChatError::Config(format!("unsupported scheme '{}'", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| ChatError::Config(format!("cannot use scheme {} for {}", scheme, base_url)))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

#[async_trait]
impl Transport for SocketIoTransport {
    async fn open(&self) -> Result<TransportLink, ChatError> {
        info!("Connecting to realtime endpoint {}", self.endpoint);

        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(self.endpoint.as_str()))
            .await
            .map_err(|_| ChatError::Transport(format!("connection timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        let (inbound_tx, inbound_rx) = mpsc::channel(100);
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(run_socket(stream, outbound_rx, inbound_tx, ready_tx));

        // Wait for the namespace connect before handing out the link
        let ready = tokio::time::timeout(self.connect_timeout, ready_rx).await;
        match ready {
            Ok(Ok(Ok(()))) => {
                info!("Realtime session established");
                Ok(TransportLink { outbound: outbound_tx, inbound: inbound_rx, task: Some(task) })
            }
            Ok(Ok(Err(e))) => {
                task.abort();
                Err(e)
            }
            Ok(Err(_)) => {
                task.abort();
                Err(ChatError::Transport("socket closed during handshake".to_string()))
            }
            Err(_) => {
                task.abort();
                Err(ChatError::Transport(format!("handshake timed out after {:?}", self.connect_timeout)))
            }
        }
    }
}

async fn run_socket<S>(
    stream: S,
    mut outbound: mpsc::Receiver<ClientEvent>,
    inbound: mpsc::Sender<ServerEvent>,
    ready: oneshot::Sender<Result<(), ChatError>>,
) where
    S: futures_util::Stream<Item = Result<WsFrame, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsFrame, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin
        + Send
        + 'static,
{
    let (mut write, mut read) = stream.split();
    let mut ready = Some(ready);

    loop {
        tokio::select! {
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(WsFrame::Text(text))) => text,
                    Some(Ok(WsFrame::Close(_))) | None => {
                        info!("Realtime socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Realtime socket error: {}", e);
                        break;
                    }
                };

                let packet = match protocol::decode(&text) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Skipping undecodable frame: {}", e);
                        continue;
                    }
                };

                match packet {
                    Packet::Open(handshake) => {
                        debug!("Engine.IO handshake: {}", handshake);
                        if let Err(e) = write.send(WsFrame::Text(CONNECT_FRAME.to_string())).await {
                            error!("Failed to send namespace connect: {}", e);
                            break;
                        }
                    }
                    Packet::Connect => {
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Ok(()));
                        }
                    }
                    Packet::ConnectError(data) => {
                        error!("Server refused the connection: {}", data);
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Err(ChatError::Transport(format!("connect refused: {}", data))));
                        }
                        break;
                    }
                    Packet::Ping => {
                        if let Err(e) = write.send(WsFrame::Text(PONG_FRAME.to_string())).await {
                            error!("Failed to answer ping: {}", e);
                            break;
                        }
                    }
                    Packet::Event(event) => {
                        if inbound.send(event).await.is_err() {
                            debug!("Inbound receiver dropped, closing socket");
                            break;
                        }
                    }
                    Packet::Close | Packet::Disconnect => {
                        info!("Server ended the realtime session");
                        break;
                    }
                    Packet::Pong | Packet::Ignored => {}
                }
            }
            event = outbound.recv() => {
                let Some(event) = event else {
                    debug!("Outbound channel closed, closing socket");
                    let _ = write.send(WsFrame::Close(None)).await;
                    break;
                };
                let frame = match protocol::encode(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Failed to encode outbound event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(WsFrame::Text(frame)).await {
                    error!("Failed to write to realtime socket: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_endpoint_from_http_base() {
        let url = socket_endpoint("http://localhost:5000").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5000/socket.io/?EIO=4&transport=websocket");

        let url = socket_endpoint("https://api.example.com/").unwrap();
        assert_eq!(url.as_str(), "wss://api.example.com/socket.io/?EIO=4&transport=websocket");
    }

    #[test]
    fn test_socket_endpoint_rejects_bad_urls() {
        assert!(socket_endpoint("not a url").is_err());
        assert!(socket_endpoint("ftp://example.com").is_err());
    }
}
