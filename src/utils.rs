use anyhow::Result;
use chrono::{DateTime, Local};
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

// The REPL owns stdout, so log lines go to a file unless none was given

const CRATE_TARGET: &str = "mentorchat";

/// Line logger for the chat binary. Our own records pass at the configured
/// level; dependencies (reqwest, tungstenite, rustls) only from warnings up.
pub struct ChatLogger {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl ChatLogger {
    pub fn to_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::with_sink(Box::new(file)))
    }

    pub fn to_stdout() -> Self {
        Self::with_sink(Box::new(std::io::stdout()))
    }

    fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        ChatLogger { sink: Mutex::new(sink) }
    }
}

fn wanted(metadata: &Metadata) -> bool {
    metadata.target().starts_with(CRATE_TARGET) || metadata.level() <= Level::Warn
}

fn format_record(now: DateTime<Local>, record: &Record) -> String {
    format!(
        "[{}] {:<5} {} ({}:{}) {}\n",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.target(),
        record.file().unwrap_or("?"),
        record.line().unwrap_or(0),
        record.args()
    )
}

impl log::Log for ChatLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && wanted(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(Local::now(), record);
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.flush();
        }
    }
}

/// Read a line of input from stdin, trimming whitespace
pub fn read_line() -> Result<String> {
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub fn setup_logging(log_file: Option<&Path>, level: LevelFilter) -> Result<()> {
    let logger = match log_file {
        Some(path) => ChatLogger::to_file(path)?,
        None => ChatLogger::to_stdout(),
    };
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;

    log::info!("{} {} logging at {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), level);
    Ok(())
}
