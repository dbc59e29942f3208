use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Console commands accepted by the player loop.
///
/// Lines are either plain words (`move 0 2`) or the JSON form of this enum
/// (`{"cmd":"Move","from":0,"to":2}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play,
    Stop,
    Next,
    Select { index: usize },
    /// Signed so that drag positions outside the list reach the playlist,
    /// which ignores them.
    Move { from: i64, to: i64 },
    Refresh,
    List,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{0}: missing or invalid argument")]
    Argument(&'static str),
    #[error("invalid JSON command: {0}")]
    Json(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        if line.starts_with('{') {
            return serde_json::from_str(line).map_err(|e| ParseError::Json(e.to_string()));
        }

        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(ParseError::Empty);
        };

        match name.to_ascii_lowercase().as_str() {
            "play" | "p" => Ok(Command::Play),
            "stop" | "s" => Ok(Command::Stop),
            "next" | "n" => Ok(Command::Next),
            "refresh" | "r" => Ok(Command::Refresh),
            "list" | "ls" | "l" => Ok(Command::List),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            "select" | "sel" => words
                .next()
                .and_then(|w| w.parse().ok())
                .map(|index| Command::Select { index })
                .ok_or(ParseError::Argument("select")),
            "move" | "mv" => {
                // Non-numeric positions become -1 and are ignored downstream.
                let mut index = || {
                    words
                        .next()
                        .and_then(|w| w.parse::<i64>().ok())
                        .unwrap_or(-1)
                };
                let from = index();
                let to = index();
                Ok(Command::Move { from, to })
            }
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

pub const HELP: &str = "commands: play | stop | next | select N | move FROM TO | refresh | list | quit";
