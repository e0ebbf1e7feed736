//! Command-line arguments and console input commands.

use clap::Parser;
use thiserror::Error;

use crate::config::{ChatConfig, DEFAULT_PATH};

/// Usage line printed by `/help`.
pub const HELP: &str = "Type a message to send it. Commands: /dm <user> <message>, /history, /help, /quit";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Name shown to other participants. Prompted for when omitted.
    #[arg(long, short)]
    pub username: Option<String>,

    /// Connect to a chat server on localhost instead of production.
    #[arg(long)]
    pub local: bool,

    /// Chat server endpoint, e.g. wss://example.org or ws://127.0.0.1:3000.
    /// Takes precedence over --local.
    #[arg(long, env = "CHAT_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Sub-path the server mounts its Socket.IO handler on.
    #[arg(long, env = "CHAT_PATH", default_value = DEFAULT_PATH)]
    pub path: String,
}

impl Cli {
    pub fn config(&self) -> ChatConfig {
        let config = ChatConfig::new()
            .with_local_mode(self.local)
            .with_path(self.path.as_str());
        match self.endpoint.as_deref() {
            Some(endpoint) => config.with_endpoint(endpoint),
            None => config,
        }
    }
}

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Say(String),
    Direct { recipient: String, text: String },
    History,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown command /{0}, try /help")]
    UnknownCommand(String),
}

impl InputCommand {
    pub fn parse(line: &str) -> Result<Self, InputError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(command) = line.trim_start().strip_prefix('/') else {
            return Ok(Self::Say(line.to_string()));
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .unwrap_or((command, ""));
        match name {
            "quit" | "exit" => Ok(Self::Quit),
            "history" => Ok(Self::History),
            "help" => Ok(Self::Help),
            "dm" => {
                let (recipient, text) = rest
                    .trim_start()
                    .split_once(char::is_whitespace)
                    .ok_or(InputError::Usage("/dm <user> <message>"))?;
                Ok(Self::Direct {
                    recipient: recipient.to_string(),
                    text: text.trim_start().to_string(),
                })
            }
            other => Err(InputError::UnknownCommand(other.to_string())),
        }
    }
}
