//! Line commands understood by the interactive front end.
//!
//! ```text
//! index-create <source> <index> <key size>
//! index-find <index> <key>
//! index-insert <index> "<key> <value>"
//! index-list <index> <key> <count>
//! ```
//!
//! Command names are case-insensitive. File names are resolved against
//! the configured working directory.

use std::str::FromStr;

use crate::config::IndexConfig;
use crate::index::{Index, IndexError};

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create {
        source: String,
        index: String,
        key_size: usize,
    },
    Find {
        index: String,
        key: String,
    },
    Insert {
        index: String,
        key: String,
        value: String,
    },
    List {
        index: String,
        key: String,
        count: usize,
    },
}

impl Command {
    /// Run the command and return the text to print.
    pub fn execute(&self, config: &IndexConfig) -> Result<String, IndexError> {
        match self {
            Self::Create {
                source,
                index,
                key_size,
            } => {
                let (_, count) = Index::create(
                    &config.resolve(source),
                    &config.resolve(index),
                    *key_size,
                    config.source_key_width,
                )?;
                Ok(format!("index created: {count} keys"))
            }
            Self::Find { index, key } => {
                let outcome = Index::open(&config.resolve(index))?.find(key)?;
                Ok(outcome.to_string())
            }
            Self::Insert { index, key, value } => {
                let result = Index::open(&config.resolve(index))?.insert(key, value)?;
                Ok(result.to_string())
            }
            Self::List { index, key, count } => {
                let records = Index::open(&config.resolve(index))?.list(key, *count)?;
                Ok(records.join("\n"))
            }
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        match name.to_ascii_lowercase().as_str() {
            "index-create" => {
                let mut args = Arguments::new("index-create", rest);
                let source = args.next("source")?;
                let index = args.next("index")?;
                let key_size = args.next_number("key size")?;
                args.finish()?;
                Ok(Self::Create {
                    source,
                    index,
                    key_size,
                })
            }
            "index-find" => {
                let mut args = Arguments::new("index-find", rest);
                let index = args.next("index")?;
                let key = args.next("key")?;
                args.finish()?;
                Ok(Self::Find { index, key })
            }
            "index-insert" => parse_insert(rest),
            "index-list" => {
                let mut args = Arguments::new("index-list", rest);
                let index = args.next("index")?;
                let key = args.next("key")?;
                let count = args.next_number("count")?;
                args.finish()?;
                Ok(Self::List { index, key, count })
            }
            _ => Err(CommandError::Invalid),
        }
    }
}

/// `<index> "<key> <value>"`; the value may contain spaces.
fn parse_insert(rest: &str) -> Result<Command, CommandError> {
    let rest = rest.trim();
    let (index, record) = rest
        .split_once(char::is_whitespace)
        .ok_or(CommandError::MissingArgument {
            command: "index-insert",
            argument: if rest.is_empty() { "index" } else { "record" },
        })?;

    let record = record.trim();
    let inner = record
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| CommandError::UnquotedRecord(record.to_string()))?;

    let (key, value) = inner
        .split_once(' ')
        .filter(|(key, _)| !key.is_empty())
        .ok_or(CommandError::MissingArgument {
            command: "index-insert",
            argument: "value",
        })?;

    Ok(Command::Insert {
        index: index.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Whitespace-separated arguments of one command.
struct Arguments<'a> {
    command: &'static str,
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Arguments<'a> {
    fn new(command: &'static str, rest: &'a str) -> Self {
        Self {
            command,
            tokens: rest.split_whitespace(),
        }
    }

    fn next(&mut self, argument: &'static str) -> Result<String, CommandError> {
        self.tokens
            .next()
            .map(str::to_string)
            .ok_or(CommandError::MissingArgument {
                command: self.command,
                argument,
            })
    }

    fn next_number(&mut self, argument: &'static str) -> Result<usize, CommandError> {
        let value = self.next(argument)?;
        value
            .parse()
            .map_err(|_| CommandError::InvalidNumber { argument, value })
    }

    fn finish(mut self) -> Result<(), CommandError> {
        match self.tokens.next() {
            Some(extra) => Err(CommandError::UnexpectedArgument(extra.to_string())),
            None => Ok(()),
        }
    }
}

/// Errors that can occur when parsing a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Not a known command.
    Invalid,
    /// A required argument is missing.
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    /// A numeric argument did not parse.
    InvalidNumber {
        argument: &'static str,
        value: String,
    },
    /// An argument follows the last expected one.
    UnexpectedArgument(String),
    /// The record of an insert is not wrapped in double quotes.
    UnquotedRecord(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid => f.write_str("command invalid"),
            Self::MissingArgument { command, argument } => {
                write!(f, "command invalid: {command} needs a {argument}")
            }
            Self::InvalidNumber { argument, value } => {
                write!(f, "command invalid: {argument} '{value}' is not a number")
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "command invalid: unexpected argument '{arg}'")
            }
            Self::UnquotedRecord(record) => {
                write!(f, "command invalid: record {record} must be quoted")
            }
        }
    }
}

impl std::error::Error for CommandError {}
