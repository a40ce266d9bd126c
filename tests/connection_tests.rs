// Realtime connection manager tests

mod common;
use common::{msg, setup_logging, MemoryTransport};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use mentorchat::chat::protocol::ClientEvent;
use mentorchat::chat::{ConnectionManager, ConnectionState};
use mentorchat::ChatError;

fn manager() -> (ConnectionManager, Arc<MemoryTransport>) {
    setup_logging();
    let transport = Arc::new(MemoryTransport::default());
    (ConnectionManager::new(transport.clone()), transport)
}

#[tokio::test]
async fn test_open_registers_user_once() -> Result<()> {
    let (mut manager, transport) = manager();

    manager.open("u1").await?;
    manager.open("u1").await?;

    assert_eq!(transport.opens(), 1, "a second open must not create another session");
    assert_eq!(manager.state(), ConnectionState::Connected);

    let mut server = transport.take_server();
    match server.next_event().await? {
        ClientEvent::RegisterUser(user_id) => assert_eq!(user_id, "u1"),
        other => panic!("Expected registerUser, got {:?}", other),
    }
    assert!(server.from_client.try_recv().is_err(), "registerUser is sent once per session");
    Ok(())
}

#[tokio::test]
async fn test_open_for_other_user_replaces_session() -> Result<()> {
    let (mut manager, transport) = manager();

    manager.open("u1").await?;
    manager.open("u2").await?;

    assert_eq!(transport.opens(), 2);
    assert_eq!(manager.user_id(), Some("u2"));

    let mut newest = transport.take_server();
    match newest.next_event().await? {
        ClientEvent::RegisterUser(user_id) => assert_eq!(user_id, "u2"),
        other => panic!("Expected registerUser, got {:?}", other),
    }

    // The first session's outbound side has been released
    let mut first = transport.take_server();
    first.next_event().await?; // its registerUser
    assert!(first.next_event().await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_single_message_handler() -> Result<()> {
    let (mut manager, _transport) = manager();

    let _handler = manager.on_message()?;
    assert!(matches!(manager.on_message(), Err(ChatError::HandlerAlreadyRegistered)));
    Ok(())
}

#[tokio::test]
async fn test_pushed_messages_reach_the_handler() -> Result<()> {
    let (mut manager, transport) = manager();
    let mut handler = manager.on_message()?;
    manager.open("A").await?;

    let server = transport.take_server();
    server.push(msg("B", "A", 1, "ping")).await;

    let received = tokio::time::timeout(Duration::from_secs(2), handler.recv()).await?.expect("handler open");
    assert_eq!(received.body, "ping");
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent_and_send_fails_after() -> Result<()> {
    let (mut manager, _transport) = manager();

    // Closing something never opened is fine
    manager.close();
    manager.open("A").await?;
    manager.close();
    manager.close();

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    let result = manager.send(&msg("A", "B", 1, "hello")).await;
    assert!(matches!(result, Err(ChatError::Disconnected)));
    Ok(())
}

#[tokio::test]
async fn test_send_is_pushed_to_server() -> Result<()> {
    let (mut manager, transport) = manager();
    manager.open("A").await?;
    let mut server = transport.take_server();
    server.next_event().await?; // registerUser

    manager.send(&msg("A", "B", 7, "hello")).await?;
    match server.next_event().await? {
        ClientEvent::SendMessage(message) => assert_eq!(message.body, "hello"),
        other => panic!("Expected sendMessage, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_server_hangup_is_reported() -> Result<()> {
    let (mut manager, transport) = manager();
    manager.open("A").await?;

    // Dropping the server side ends the inbound stream
    drop(transport.take_server());

    let mut state = manager.state();
    for _ in 0..50 {
        if state == ConnectionState::Disconnected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        state = manager.state();
    }
    assert_eq!(state, ConnectionState::Disconnected);
    assert!(!manager.is_connected());

    // Manual re-open creates a fresh session
    manager.open("A").await?;
    assert_eq!(transport.opens(), 2);
    Ok(())
}

#[tokio::test]
async fn test_transport_failure_sets_error_state() -> Result<()> {
    let (mut manager, transport) = manager();
    transport.fail_opens(true);

    assert!(matches!(manager.open("A").await, Err(ChatError::Transport(_))));
    assert_eq!(manager.state(), ConnectionState::Error);

    transport.fail_opens(false);
    manager.open("A").await?;
    assert_eq!(manager.state(), ConnectionState::Connected);
    Ok(())
}
