//! Operator console commands.
//!
//! Lines starting with `/` are commands, everything else is chat for the
//! bot's channel. Commands that are unknown or missing their arguments are
//! reported locally and never forwarded, so half-typed command syntax does
//! not leak into the channel.

use crate::protocol::OutboundCommand;

/// One parsed line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `/quit [reason]` or `/q [reason]`.
    Quit { reason: Option<String> },
    /// `/msg <target> <text>`.
    Msg { target: String, text: String },
    /// `/join <#channel>` or `/j <#channel>`.
    Join { channel: String },
    /// `/raw <line>` or `/r <line>`.
    Raw(String),
    /// Slash command that matched nothing above; holds the text after `/`.
    Unrecognized(String),
    Empty,
    Chat(String),
}

impl ConsoleCommand {
    /// Parses one console line. The first matching rule wins.
    pub fn parse(input: &str) -> Self {
        let line = input.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Self::Empty;
        }
        let Some(body) = line.strip_prefix('/') else {
            return Self::Chat(line.to_string());
        };

        let (word, args) = body
            .split_once(char::is_whitespace)
            .map_or((body, ""), |(word, args)| (word, args.trim()));
        let unrecognized = || Self::Unrecognized(body.trim_end().to_string());

        match word {
            "quit" | "q" => Self::Quit {
                reason: (!args.is_empty()).then(|| args.to_string()),
            },
            "msg" => match args.split_once(char::is_whitespace) {
                Some((target, text)) if !text.trim().is_empty() => Self::Msg {
                    target: target.to_string(),
                    text: text.trim_start().to_string(),
                },
                _ => unrecognized(),
            },
            "join" | "j" if is_channel(args) => Self::Join {
                channel: args.to_string(),
            },
            "raw" | "r" if !args.is_empty() => Self::Raw(args.to_string()),
            _ => unrecognized(),
        }
    }

    /// The protocol line this command puts on the wire, if any.
    ///
    /// Quit is excluded: it ends the session and is driven by the caller.
    pub fn outbound(&self, channel: &str) -> Option<OutboundCommand> {
        match self {
            Self::Msg { target, text } => Some(OutboundCommand::Privmsg {
                target: target.clone(),
                text: text.clone(),
            }),
            Self::Join { channel } => Some(OutboundCommand::Join(channel.clone())),
            Self::Raw(line) => Some(OutboundCommand::Raw(line.clone())),
            Self::Chat(text) => Some(OutboundCommand::Privmsg {
                target: channel.to_string(),
                text: text.clone(),
            }),
            Self::Quit { .. } | Self::Unrecognized(_) | Self::Empty => None,
        }
    }
}

fn is_channel(name: &str) -> bool {
    name.len() > 1 && name.starts_with(['#', '&'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_with_reason() {
        assert_eq!(
            ConsoleCommand::parse("/quit bye\n"),
            ConsoleCommand::Quit {
                reason: Some("bye".to_string())
            }
        );
    }

    #[test]
    fn short_quit_without_reason() {
        assert_eq!(
            ConsoleCommand::parse("/q"),
            ConsoleCommand::Quit { reason: None }
        );
        assert_eq!(
            ConsoleCommand::parse("/quit   \n"),
            ConsoleCommand::Quit { reason: None }
        );
    }

    #[test]
    fn quit_must_be_the_whole_command_word() {
        assert_eq!(
            ConsoleCommand::parse("/quitte123"),
            ConsoleCommand::Unrecognized("quitte123".to_string())
        );
    }

    #[test]
    fn msg_targets_user_with_text() {
        let command = ConsoleCommand::parse("/msg alice hello there\n");
        assert_eq!(
            command,
            ConsoleCommand::Msg {
                target: "alice".to_string(),
                text: "hello there".to_string(),
            }
        );
        assert_eq!(
            command.outbound("#news").map(|c| c.to_string()),
            Some("PRIVMSG alice :hello there".to_string())
        );
    }

    #[test]
    fn msg_without_text_is_unrecognized() {
        assert_eq!(
            ConsoleCommand::parse("/msg alice"),
            ConsoleCommand::Unrecognized("msg alice".to_string())
        );
        assert_eq!(
            ConsoleCommand::parse("/msg"),
            ConsoleCommand::Unrecognized("msg".to_string())
        );
    }

    #[test]
    fn join_requires_a_channel_name() {
        assert_eq!(
            ConsoleCommand::parse("/j #rust"),
            ConsoleCommand::Join {
                channel: "#rust".to_string()
            }
        );
        assert_eq!(
            ConsoleCommand::parse("/join rust"),
            ConsoleCommand::Unrecognized("join rust".to_string())
        );
        assert_eq!(
            ConsoleCommand::parse("/join"),
            ConsoleCommand::Unrecognized("join".to_string())
        );
    }

    #[test]
    fn raw_is_sent_verbatim() {
        let command = ConsoleCommand::parse("/raw MODE relaybot +i\n");
        assert_eq!(command, ConsoleCommand::Raw("MODE relaybot +i".to_string()));
        assert_eq!(
            command.outbound("#news").map(|c| c.to_string()),
            Some("MODE relaybot +i".to_string())
        );
    }

    #[test]
    fn unknown_slash_command_is_never_forwarded() {
        let command = ConsoleCommand::parse("/dance\n");
        assert_eq!(command, ConsoleCommand::Unrecognized("dance".to_string()));
        assert_eq!(command.outbound("#news"), None);
    }

    #[test]
    fn space_after_slash_is_reported_as_typed() {
        let command = ConsoleCommand::parse("/ quit\n");
        assert_eq!(command, ConsoleCommand::Unrecognized(" quit".to_string()));
        assert_eq!(command.outbound("#news"), None);
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(ConsoleCommand::parse(""), ConsoleCommand::Empty);
        assert_eq!(ConsoleCommand::parse("\n"), ConsoleCommand::Empty);
        assert_eq!(ConsoleCommand::parse("   \r\n"), ConsoleCommand::Empty);
    }

    #[test]
    fn plain_text_is_channel_chat() {
        let command = ConsoleCommand::parse("hello everyone\n");
        assert_eq!(command, ConsoleCommand::Chat("hello everyone".to_string()));
        assert_eq!(
            command.outbound("#news").map(|c| c.to_string()),
            Some("PRIVMSG #news :hello everyone".to_string())
        );
    }
}
