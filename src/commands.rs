// REPL input parsing

pub const COMMANDS: &str = "/list, /open <peer>, /history, /connect, /quit";

/// One line typed into the chat prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Quit,
    List,
    Open(&'a str),
    History,
    Connect,
    /// Starts with '/' but is not a usable command. Never sent as a message.
    Invalid(&'a str),
    Send(&'a str),
}

/// Parse a line. Empty lines give None.
pub fn parse_command(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::Send(line));
    }

    let (cmd, arg) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let arg = arg.trim();
    Some(match (cmd, arg.is_empty()) {
        ("/quit", _) => Command::Quit,
        ("/list", _) => Command::List,
        ("/open", false) => Command::Open(arg),
        ("/history", _) => Command::History,
        ("/connect", _) => Command::Connect,
        _ => Command::Invalid(line),
    })
}
