#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::Result;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

mod commands;
mod config;
mod utils;

use crate::commands::{parse_command, Command, COMMANDS};
use crate::config::{config_from_env, load_config, save_config, set_config_path_override, ChatConfig};
use mentorchat::chat::{ChatClient, ChatEvent, ConnectionState, RestClient, RouteOutcome, SocketIoTransport, ViewState};
use mentorchat::models::{Contact, DeliveryStatus, Message};
use mentorchat::{ChatError, Session};

/// Command line arguments for mentorchat
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "mentorchat: direct messages with your mentorship connections.",
    long_about = "mentorchat connects to the mentorship platform backend and lets you chat with accepted connections.\n\n\
    Commands inside the chat:\n\
    /list            show your connections\n\
    /open <peer>     open a conversation (id or username)\n\
    /history         print the open conversation\n\
    /connect         re-open the realtime session after a drop\n\
    /quit            leave\n\
    Anything else is sent to the open conversation."
)]
struct Args {
    /// Backend base url, e.g. http://localhost:5000
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Your user id on the platform
    #[arg(long, value_name = "ID")]
    user_id: Option<String>,

    /// Your username on the platform
    #[arg(long, value_name = "NAME")]
    username: Option<String>,

    /// Conversation to open on start (id or username)
    #[arg(long, value_name = "PEER")]
    peer: Option<String>,

    /// Log file, defaults to mentorchat.log in the working directory. Use - for stdout
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Config file to use instead of the one in the user config dir
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Prompts for whatever the config is missing
fn prompt_config() -> ChatConfig {
    eprintln!("Enter backend base url (e.g., http://localhost:5000):");
    let base_url = utils::read_line().unwrap_or_default();
    eprintln!("Enter your user id:");
    let user_id = utils::read_line().unwrap_or_default();
    eprintln!("Enter your username:");
    let username = utils::read_line().unwrap_or_default();
    ChatConfig::new(&base_url, &user_id, &username)
}

/// Resolve config: environment, then command line, then cached file, then prompt.
/// The flag tells whether the result came from the environment.
fn resolve_config(args: &Args) -> Result<(ChatConfig, bool)> {
    if let Some(config) = config_from_env() {
        return Ok((config, true));
    }
    if let (Some(base_url), Some(user_id)) = (&args.base_url, &args.user_id) {
        let username = args.username.clone().unwrap_or_else(|| user_id.clone());
        return Ok((ChatConfig::new(base_url, user_id, &username), false));
    }
    if let Some(config) = load_config()? {
        info!("Using cached config for {}", config.username);
        return Ok((config, false));
    }
    Ok((prompt_config(), false))
}

fn print_message(message: &Message, local_user_id: &str) {
    let who = if message.sender_id == local_user_id { "you" } else { message.sender_id.as_str() };
    let marker = match message.delivery_status {
        DeliveryStatus::Sending => " (sending)",
        DeliveryStatus::Failed => " (not sent)",
        DeliveryStatus::Stored | DeliveryStatus::Unknown => "",
    };
    println!("[{}] {}: {}{}", message.created_at.format("%H:%M"), who, message.body, marker);
}

fn find_peer<'a>(contacts: &'a [Contact], wanted: &'a str) -> &'a str {
    contacts
        .iter()
        .find(|c| c.id == wanted || c.username.eq_ignore_ascii_case(wanted))
        .map(|c| c.id.as_str())
        .unwrap_or(wanted)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // "-" logs to stdout, mixed into the chat output
    let log_file_path = args.log_file.clone().unwrap_or_else(|| PathBuf::from("mentorchat.log"));
    let log_file = (log_file_path.as_os_str() != "-").then_some(log_file_path.as_path());
    utils::setup_logging(log_file, LevelFilter::Debug)?;
    info!("mentorchat starting up on {} {}", std::env::consts::OS, std::env::consts::ARCH);

    if let Some(path) = &args.config {
        set_config_path_override(path.clone());
    }

    let (config, config_from_env) = resolve_config(&args)?;
    config.validate()?;

    let backend = Arc::new(RestClient::new(&config.base_url)?);
    let transport = Arc::new(SocketIoTransport::new(&config.base_url, Duration::from_secs(config.connect_timeout_secs))?);
    let mut client = ChatClient::new(Session::logged_in(config.user()), transport, backend)?;

    println!("Connecting to {} as {}... please wait...", config.base_url, config.username);
    if let Err(e) = client.connect().await {
        error!("Connection failed: {}", e);
        eprintln!(
            "Failed to connect to {}\n\
             Details: {}\n\
             Please check that the backend is running and the url is correct.",
            config.base_url, e
        );
        return Err(e.into());
    }
    if !config_from_env {
        if let Err(e) = save_config(&config) {
            eprintln!("Warning: Failed to save config: {}", e);
        }
    }

    let mut contacts = match client.contacts().await {
        Ok(contacts) => contacts,
        Err(e) => {
            warn!("Could not load connections: {}", e);
            Vec::new()
        }
    };
    println!("{} connection(s). Type /list to see them.", contacts.len());

    // Open the requested conversation, or the first connection like the web app does
    let initial = args.peer.clone().or_else(|| contacts.first().map(|c| c.id.clone()));
    if let Some(peer) = initial {
        let peer_id = find_peer(&contacts, &peer).to_string();
        println!("Opening conversation with {}...", peer_id);
        client.open_conversation(&peer_id);
    }

    let local_user_id = client.user().id.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // The session can drop without any event reaching the loop, so poll it
    let mut connection_check = tokio::time::interval(Duration::from_secs(5));
    let mut last_state = client.connection_state();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                let command = match parse_command(&line) {
                    Some(command) => command,
                    None => continue,
                };

                match command {
                    Command::Quit => break,
                    Command::List => {
                        match client.contacts().await {
                            Ok(fresh) => contacts = fresh,
                            Err(e) => eprintln!("Could not load connections: {}", e),
                        }
                        for contact in &contacts {
                            let unread = client.unread(&contact.id);
                            let badge = if unread > 0 { format!(" [{} new]", unread) } else { String::new() };
                            println!("  {} ({}){}", contact.username, contact.id, badge);
                        }
                    }
                    Command::Open(peer) => {
                        let peer_id = find_peer(&contacts, peer).to_string();
                        println!("Opening conversation with {}...", peer_id);
                        client.open_conversation(&peer_id);
                    }
                    Command::History => {
                        match client.view_state() {
                            ViewState::Live { .. } => {
                                for message in client.snapshot() {
                                    print_message(message, &local_user_id);
                                }
                            }
                            ViewState::Loading { .. } => match client.history_error() {
                                Some(e) => println!("History failed to load ({}). /open the conversation again to retry.", e),
                                None => println!("Still loading..."),
                            },
                            ViewState::Idle => println!("No conversation open. Use /open <peer>."),
                        }
                    }
                    Command::Connect => {
                        println!("Connecting...");
                        match client.connect().await {
                            Ok(()) => println!("Connected."),
                            Err(e) => eprintln!("Could not connect: {}", e),
                        }
                        last_state = client.connection_state();
                    }
                    Command::Invalid(input) => {
                        eprintln!("Unknown command or missing argument: {}. Commands: {}", input, COMMANDS);
                    }
                    Command::Send(body) => match client.send(body).await {
                        Ok(message) => print_message(&message, &local_user_id),
                        Err(ChatError::Disconnected) => {
                            eprintln!(
                                "Message not sent: connection is {:?}. Use /connect to reconnect.",
                                client.connection_state()
                            );
                        }
                        Err(e) => eprintln!("Message not sent: {}", e),
                    },
                }
            }
            event = client.next_event() => {
                match event {
                    Some(ChatEvent::Message { message, outcome: RouteOutcome::Accepted }) => print_message(&message, &local_user_id),
                    Some(ChatEvent::Message { message, outcome: RouteOutcome::Dropped }) => {
                        if message.receiver_id == local_user_id {
                            println!("(new message from {})", message.sender_id);
                        }
                    }
                    Some(ChatEvent::Message { .. }) => {}
                    Some(ChatEvent::HistoryLoaded { peer_id, count }) => {
                        if count == 0 {
                            println!("No messages with {} yet.", peer_id);
                        }
                        for message in client.snapshot() {
                            print_message(message, &local_user_id);
                        }
                    }
                    Some(ChatEvent::HistoryFailed { peer_id, error }) => {
                        eprintln!("Could not load history with {}: {}", peer_id, error);
                    }
                    None => break,
                }
            }
            _ = connection_check.tick() => {
                let state = client.connection_state();
                if state != last_state {
                    match state {
                        ConnectionState::Connected => println!("(connected)"),
                        ConnectionState::Disconnected | ConnectionState::Error => {
                            println!("(connection lost, type /connect to reconnect)")
                        }
                        ConnectionState::Connecting => {}
                    }
                    last_state = state;
                }
            }
        }
    }

    client.logout();
    info!("mentorchat shut down");
    Ok(())
}
