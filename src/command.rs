//! Shell commands.
//!
//! This module defines the [`Command`] enum, one variant per action the
//! interactive shell can run against a [`Session`](crate::session::Session),
//! and the parser that turns a line of user input into a command.
//!
//! # Overview
//!
//! - `.exit`, `.servers`, `.session`, `.unpause`: session level commands.
//! - `kv get|reload|value|set|remove|clear`: key-value servers.
//! - `sql <server> <statement>` and `sql! <server> <query>`: SQL servers, the
//!   latter bypassing the result cache.
//! - `file ls|reload|cat|write|rm`: file servers.
//!
//! Key-value keys and values are strings unless prefixed with a type tag, e.g.
//! `int:3`, `bool:true`, `double:0.5`, `datetime:1700000000000`,
//! `stringlist:a,b` or `binary:AAE=` (base64).
//!
//! # Example
//! ```rust
//! use storage_inspector::{Command, Statement};
//!
//! let cmd: Command = "sql main.db select * from users".try_into().unwrap();
//! assert_eq!(
//!     cmd,
//!     Command::Sql {
//!         server: "main.db".to_string(),
//!         query: "select * from users".to_string(),
//!         statement: Statement::Query,
//!     }
//! );
//! ```
use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;

use crate::{
    Statement,
    protocol::ValueWithType,
    statement::StatementError,
};

/// List of possible error that a command can throw.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("invalid value '{value}', {reason}")]
    InvalidValue { value: String, reason: String },

    #[error(transparent)]
    InvalidStatement(#[from] StatementError),

    #[error("no command provided")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Exit,
    /// Lists every storage server announced so far.
    Servers,
    /// Prints the session identification of the inspected application.
    Session,
    Unpause,
    KeyValueGet { server: String },
    KeyValueReload { server: String },
    /// Fetches a single value, binary payload included.
    KeyValueValue { server: String, key: ValueWithType },
    KeyValueSet {
        server: String,
        key: ValueWithType,
        value: ValueWithType,
    },
    KeyValueRemove { server: String, key: ValueWithType },
    KeyValueClear { server: String },
    Sql {
        server: String,
        query: String,
        statement: Statement,
    },
    /// Runs a query again even if its result is cached.
    SqlReload { server: String, query: String },
    FileList { server: String },
    FileReload { server: String },
    FileCat { server: String, path: String },
    FileWrite {
        server: String,
        path: String,
        contents: String,
    },
    FileRemove {
        server: String,
        path: String,
        recursive: bool,
    },
}

/// Parses a typed literal such as `int:3`. Untagged input is a string.
pub fn parse_value(input: &str) -> Result<ValueWithType, CommandError> {
    let invalid = |reason: &str| CommandError::InvalidValue {
        value: input.to_string(),
        reason: reason.to_string(),
    };

    let Some((tag, raw)) = input.split_once(':') else {
        return Ok(ValueWithType::String(input.to_string()));
    };

    match tag {
        "string" => Ok(ValueWithType::String(raw.to_string())),
        "int" => raw
            .parse()
            .map(ValueWithType::Int)
            .map_err(|_| invalid("expected an integer")),
        "double" => raw
            .parse()
            .map(ValueWithType::Double)
            .map_err(|_| invalid("expected a number")),
        "datetime" => raw
            .parse()
            .map(ValueWithType::DateTime)
            .map_err(|_| invalid("expected milliseconds since the epoch")),
        "bool" => raw
            .parse()
            .map(ValueWithType::Bool)
            .map_err(|_| invalid("expected true or false")),
        "binary" => STANDARD
            .decode(raw)
            .map(ValueWithType::Binary)
            .map_err(|_| invalid("expected base64")),
        "stringlist" => Ok(ValueWithType::StringList(if raw.is_empty() {
            Vec::new()
        } else {
            raw.split(',').map(str::to_string).collect()
        })),
        _ => Ok(ValueWithType::String(input.to_string())),
    }
}

/// Splits off the first whitespace separated word.
fn word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    Some(match input.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim_start()),
        None => (input, ""),
    })
}

fn missing(command: &str, usage: &str) -> CommandError {
    CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: format!("usage: {usage}"),
    }
}

fn server_only(rest: &str, command: &str, usage: &str) -> Result<String, CommandError> {
    match word(rest) {
        Some((server, "")) => Ok(server.to_string()),
        _ => Err(missing(command, usage)),
    }
}

fn server_and_rest<'a>(
    rest: &'a str,
    command: &str,
    usage: &str,
) -> Result<(String, &'a str), CommandError> {
    match word(rest) {
        Some((server, tail)) if !tail.trim().is_empty() => {
            Ok((server.to_string(), tail.trim_end()))
        }
        _ => Err(missing(command, usage)),
    }
}

fn key_value(rest: &str) -> Result<Command, CommandError> {
    let (sub, rest) = word(rest).ok_or_else(|| {
        missing("kv", "kv get|reload|value|set|remove|clear <server> ...")
    })?;
    match sub {
        "get" => Ok(Command::KeyValueGet {
            server: server_only(rest, "kv get", "kv get <server>")?,
        }),
        "reload" => Ok(Command::KeyValueReload {
            server: server_only(rest, "kv reload", "kv reload <server>")?,
        }),
        "clear" => Ok(Command::KeyValueClear {
            server: server_only(rest, "kv clear", "kv clear <server>")?,
        }),
        "value" | "remove" => {
            let usage = format!("kv {sub} <server> <key>");
            let (server, key) = server_and_rest(rest, &format!("kv {sub}"), &usage)?;
            let key = parse_value(key)?;
            Ok(if sub == "value" {
                Command::KeyValueValue { server, key }
            } else {
                Command::KeyValueRemove { server, key }
            })
        }
        "set" => {
            let usage = "kv set <server> <key> <value>";
            let (server, rest) = server_and_rest(rest, "kv set", usage)?;
            let (key, value) = word(rest)
                .filter(|(_, value)| !value.is_empty())
                .ok_or_else(|| missing("kv set", usage))?;
            Ok(Command::KeyValueSet {
                server,
                key: parse_value(key)?,
                value: parse_value(value)?,
            })
        }
        other => Err(CommandError::UnrecognizedCommand(format!("kv {other}"))),
    }
}

fn file(rest: &str) -> Result<Command, CommandError> {
    let (sub, rest) =
        word(rest).ok_or_else(|| missing("file", "file ls|reload|cat|write|rm <server> ..."))?;
    match sub {
        "ls" => Ok(Command::FileList {
            server: server_only(rest, "file ls", "file ls <server>")?,
        }),
        "reload" => Ok(Command::FileReload {
            server: server_only(rest, "file reload", "file reload <server>")?,
        }),
        "cat" => {
            let (server, path) = server_and_rest(rest, "file cat", "file cat <server> <path>")?;
            Ok(Command::FileCat {
                server,
                path: path.to_string(),
            })
        }
        "write" => {
            let usage = "file write <server> <path> <text>";
            let (server, rest) = server_and_rest(rest, "file write", usage)?;
            let (path, contents) = word(rest).ok_or_else(|| missing("file write", usage))?;
            Ok(Command::FileWrite {
                server,
                path: path.to_string(),
                contents: contents.to_string(),
            })
        }
        "rm" => {
            let usage = "file rm [-r] <server> <path>";
            let (recursive, rest) = match word(rest) {
                Some(("-r", rest)) => (true, rest),
                _ => (false, rest),
            };
            let (server, path) = server_and_rest(rest, "file rm", usage)?;
            Ok(Command::FileRemove {
                server,
                path: path.to_string(),
                recursive,
            })
        }
        other => Err(CommandError::UnrecognizedCommand(format!("file {other}"))),
    }
}

impl TryInto<Command> for &str {
    type Error = CommandError;

    fn try_into(self) -> Result<Command, Self::Error> {
        let (name, rest) = word(self).ok_or(CommandError::Empty)?;

        match name {
            ".exit" => Ok(Command::Exit),
            ".servers" => Ok(Command::Servers),
            ".session" => Ok(Command::Session),
            ".unpause" => Ok(Command::Unpause),
            "kv" => key_value(rest),
            "file" => file(rest),
            "sql" => {
                let (server, query) =
                    server_and_rest(rest, "sql", "sql <server> <statement>")?;
                Ok(Command::Sql {
                    statement: Statement::try_from(query)?,
                    server,
                    query: query.to_string(),
                })
            }
            "sql!" => {
                let (server, query) = server_and_rest(rest, "sql!", "sql! <server> <query>")?;
                Ok(Command::SqlReload {
                    server,
                    query: query.to_string(),
                })
            }
            _ => Err(CommandError::UnrecognizedCommand(self.trim().to_string())),
        }
    }
}
