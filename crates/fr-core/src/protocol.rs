//! IRC line protocol: tokenizing inbound lines and building outbound ones.
//!
//! Inbound lines are split into `[:prefix] COMMAND params... [:trailing]`
//! and classified into a closed set of shapes ([`InboundLine`]). Outbound
//! lines are only ever produced from [`OutboundCommand`] or operator raw
//! input, and must pass [`validate_line`] before they reach the wire.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Mode sigils that may precede a nick inside `<...>` in relayed chat.
const NICK_SIGILS: &[char] = &['~', '&', '@', '%', '+'];

/// Outbound line rejected before it reached the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("refusing to send an empty line")]
    Empty,
    #[error("line contains a CR or LF character")]
    LineBreak,
}

/// Checks that `line` is a single non-empty protocol line.
pub fn validate_line(line: &str) -> Result<(), LineError> {
    if line.contains(['\r', '\n']) {
        return Err(LineError::LineBreak);
    }
    if line.trim().is_empty() {
        return Err(LineError::Empty);
    }
    Ok(())
}

/// Commands the bot sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    Nick(String),
    User { username: String, realname: String },
    Join(String),
    Privmsg { target: String, text: String },
    Pong(String),
    Quit(Option<String>),
    /// Operator-supplied line, sent verbatim.
    Raw(String),
}

impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nick(nick) => write!(f, "NICK {nick}"),
            Self::User { username, realname } => write!(f, "USER {username} 0 * :{realname}"),
            Self::Join(channel) => write!(f, "JOIN {channel}"),
            Self::Privmsg { target, text } => write!(f, "PRIVMSG {target} :{text}"),
            Self::Pong(token) => write!(f, "PONG :{token}"),
            Self::Quit(Some(reason)) => write!(f, "QUIT :{reason}"),
            Self::Quit(None) => write!(f, "QUIT"),
            Self::Raw(line) => write!(f, "{line}"),
        }
    }
}

/// Shape of a line received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    /// `PING <token>`; must be answered with a pong echoing `token`.
    KeepaliveProbe { token: String },
    /// Numeric welcome replies (001-005) sent after registration.
    Registration { code: u16, text: String },
    Join {
        nick: Option<String>,
        channel: String,
    },
    /// `PRIVMSG` or `NOTICE`.
    Chat {
        sender: Option<String>,
        target: String,
        text: String,
    },
    /// `ERROR` line, sent by servers right before closing the link.
    Error { message: String },
    Unknown,
}

impl InboundLine {
    /// Classifies one raw line. Never fails; anything unrecognized is
    /// [`InboundLine::Unknown`].
    pub fn parse(line: &str) -> Self {
        let Some(message) = tokenize(line) else {
            return Self::Unknown;
        };
        let nick = message.prefix.map(prefix_nick);

        if message.command.eq_ignore_ascii_case("PING") {
            return message
                .params
                .first()
                .filter(|token| !token.is_empty())
                .map_or(Self::Unknown, |token| Self::KeepaliveProbe {
                    token: (*token).to_string(),
                });
        }

        if message.command.eq_ignore_ascii_case("PRIVMSG")
            || message.command.eq_ignore_ascii_case("NOTICE")
        {
            let Some(target) = message.params.first() else {
                return Self::Unknown;
            };
            let text = message.params.get(1).copied().unwrap_or_default();
            let sender = bracketed_nick(text).or(nick).map(str::to_string);
            return Self::Chat {
                sender,
                target: (*target).to_string(),
                text: text.to_string(),
            };
        }

        if message.command.eq_ignore_ascii_case("JOIN") {
            return message
                .params
                .first()
                .map_or(Self::Unknown, |channel| Self::Join {
                    nick: nick.map(str::to_string),
                    channel: (*channel).to_string(),
                });
        }

        if message.command.eq_ignore_ascii_case("ERROR") {
            return Self::Error {
                message: message.params.last().copied().unwrap_or_default().to_string(),
            };
        }

        if let Some(code) = registration_code(message.command) {
            return Self::Registration {
                code,
                text: message.params.last().copied().unwrap_or_default().to_string(),
            };
        }

        Self::Unknown
    }

    /// Best-effort nick of whoever produced the line.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Chat { sender, .. } => sender.as_deref(),
            Self::Join { nick, .. } => nick.as_deref(),
            _ => None,
        }
    }
}

/// A received line kept in the session history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub timestamp: DateTime<Utc>,
    pub raw: String,
    pub sender: Option<String>,
}

impl InboundEvent {
    pub fn new(raw: &str, line: &InboundLine, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            raw: raw.trim_end_matches(['\r', '\n']).to_string(),
            sender: line.sender().map(str::to_string),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Message<'a> {
    prefix: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
}

fn tokenize(line: &str) -> Option<Message<'_>> {
    let mut rest = line.trim_end_matches(['\r', '\n']).trim_start_matches(' ');

    let prefix = match rest.strip_prefix(':') {
        Some(stripped) => {
            let (prefix, tail) = stripped.split_once(' ')?;
            rest = tail.trim_start_matches(' ');
            Some(prefix)
        }
        None => None,
    };

    let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
    if command.is_empty() {
        return None;
    }

    let mut params = Vec::new();
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing);
            break;
        }
        match rest.split_once(' ') {
            Some((param, tail)) => {
                params.push(param);
                rest = tail;
            }
            None => {
                params.push(rest);
                break;
            }
        }
    }

    Some(Message {
        prefix,
        command,
        params,
    })
}

fn prefix_nick(prefix: &str) -> &str {
    prefix.split(['!', '@']).next().unwrap_or(prefix)
}

fn registration_code(command: &str) -> Option<u16> {
    if command.len() != 3 || !command.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    command.parse().ok().filter(|code| (1..=5).contains(code))
}

fn is_nick_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-[]\\`^{}|".contains(c)
}

/// Extracts `nick` from the first `<nick>` or `<@nick>` in `text`.
///
/// Relay bots bridging other networks prefix messages this way, so the
/// bracketed nick is a better sender than the line prefix.
fn bracketed_nick(text: &str) -> Option<&str> {
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        let candidate = &rest[open + 1..];
        let candidate = candidate
            .strip_prefix(NICK_SIGILS)
            .unwrap_or(candidate);
        let len = candidate
            .find(|c: char| !is_nick_char(c))
            .unwrap_or(candidate.len());
        if len > 0 && candidate[len..].starts_with('>') {
            return Some(&candidate[..len]);
        }
        rest = &rest[open + 1..];
    }
    None
}
