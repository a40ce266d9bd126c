//! Socket.IO v4 text framing for the realtime channel.
//!
//! Every WebSocket text frame is one Engine.IO packet: a single type digit
//! followed by an optional payload. Packet type `4` (message) carries a
//! Socket.IO packet, whose first digit is again a type; events are
//! `42["name", data]`, optionally with an ack id between the `2` and the array.
//! Only the default namespace is used.

use serde_json::Value;

use crate::error::ChatError;
use crate::models::Message;

pub const EVENT_REGISTER_USER: &str = "registerUser";
pub const EVENT_SEND_MESSAGE: &str = "sendMessage";
pub const EVENT_RECEIVE_MESSAGE: &str = "receiveMessage";

/// Client -> server events
#[derive(Debug, Clone)]
pub enum ClientEvent {
    RegisterUser(String),
    SendMessage(Message),
}

/// Server -> client events
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ReceiveMessage(Message),
    /// Any event this client does not handle
    Other { name: String, data: Value },
}

/// A decoded Engine.IO packet
#[derive(Debug, Clone)]
pub enum Packet {
    /// Engine.IO handshake, carries sid / pingInterval / pingTimeout
    Open(Value),
    Close,
    Ping,
    Pong,
    /// Namespace connect acknowledged by the server
    Connect,
    /// Server refused the namespace connect
    ConnectError(Value),
    Disconnect,
    Event(ServerEvent),
    /// Noop, upgrade, acks and anything else without meaning for us
    Ignored,
}

/// Namespace connect request, sent after the Engine.IO open packet.
pub const CONNECT_FRAME: &str = "40";
pub const PONG_FRAME: &str = "3";

pub fn encode(event: &ClientEvent) -> Result<String, ChatError> {
    let array = match event {
        ClientEvent::RegisterUser(user_id) => serde_json::json!([EVENT_REGISTER_USER, user_id]),
        ClientEvent::SendMessage(message) => serde_json::json!([EVENT_SEND_MESSAGE, serde_json::to_value(message)?]),
    };
    Ok(format!("42{}", array))
}

pub fn decode(frame: &str) -> Result<Packet, ChatError> {
    let mut chars = frame.chars();
    let engine_type = chars.next().ok_or_else(|| ChatError::Protocol("empty frame".to_string()))?;
    let rest = chars.as_str();

    match engine_type {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_packet(rest),
        '5' | '6' => Ok(Packet::Ignored),
        other => Err(ChatError::Protocol(format!("unknown Engine.IO packet type '{}'", other))),
    }
}

fn decode_socket_packet(packet: &str) -> Result<Packet, ChatError> {
    let mut chars = packet.chars();
    let socket_type = chars.next().ok_or_else(|| ChatError::Protocol("empty Socket.IO packet".to_string()))?;
    let body = chars.as_str();

    match socket_type {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(body),
        '3' => Ok(Packet::Ignored),
        '4' => {
            let data = if body.is_empty() { Value::Null } else { serde_json::from_str(body)? };
            Ok(Packet::ConnectError(data))
        }
        other => Err(ChatError::Protocol(format!("unknown Socket.IO packet type '{}'", other))),
    }
}

fn decode_event(body: &str) -> Result<Packet, ChatError> {
    // Skip an optional ack id
    let json = body.trim_start_matches(|c: char| c.is_ascii_digit());
    if json.starts_with('/') {
        return Err(ChatError::Protocol("events on custom namespaces are not supported".to_string()));
    }

    let mut items = match serde_json::from_str::<Value>(json)? {
        Value::Array(items) => items.into_iter(),
        _ => return Err(ChatError::Protocol("event payload is not an array".to_string())),
    };
    let name = match items.next() {
        Some(Value::String(name)) => name,
        _ => return Err(ChatError::Protocol("event without a name".to_string())),
    };
    let data = items.next().unwrap_or(Value::Null);

    if name == EVENT_RECEIVE_MESSAGE {
        let message: Message = serde_json::from_value(data)?;
        Ok(Packet::Event(ServerEvent::ReceiveMessage(message)))
    } else {
        Ok(Packet::Event(ServerEvent::Other { name, data }))
    }
}
