//! Operator console: reads lines and dispatches them to the session.

use std::io::Write;

use fr_core::ConsoleCommand;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use crate::session::{Session, SessionError};

/// Why the console loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator asked to quit, with an optional quit message.
    Quit(Option<String>),
    /// Console input was closed; the bot keeps running without it.
    Eof,
    Cancelled,
}

/// Reads console lines until quit, end of input or cancellation.
///
/// Local-only feedback (unknown commands, rejected lines) goes to `writer`.
/// A line that is not valid UTF-8 is reported there and skipped.
pub async fn run_console<R, W>(
    session: &Session,
    mut reader: R,
    mut writer: W,
    cancel: CancellationToken,
) -> Result<ConsoleExit, SessionError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            () = cancel.cancelled() => return Ok(ConsoleExit::Cancelled),
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => {
                tracing::info!("console input closed");
                return Ok(ConsoleExit::Eof);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "failed to read console input");
                return Ok(ConsoleExit::Eof);
            }
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            tracing::warn!(bytes = buf.len(), "console line is not valid UTF-8");
            notify(&mut writer, "Not sent: console line is not valid UTF-8.");
            continue;
        };
        if let Some(exit) = dispatch(session, line, &mut writer).await? {
            return Ok(exit);
        }
    }
}

/// Handles one console line.
///
/// Returns `Some` when the line ends the console loop. Quit is not sent
/// here; the caller owns shutdown and sends it.
pub async fn dispatch<W: Write>(
    session: &Session,
    line: &str,
    writer: &mut W,
) -> Result<Option<ConsoleExit>, SessionError> {
    let command = ConsoleCommand::parse(line);
    match &command {
        ConsoleCommand::Quit { reason } => return Ok(Some(ConsoleExit::Quit(reason.clone()))),
        ConsoleCommand::Empty => {}
        ConsoleCommand::Unrecognized(text) => {
            notify(writer, &format!("Sorry, /{text} is not a recognized command."));
        }
        ConsoleCommand::Msg { .. }
        | ConsoleCommand::Join { .. }
        | ConsoleCommand::Raw(_)
        | ConsoleCommand::Chat(_) => {
            let Some(outbound) = command.outbound(session.channel()) else {
                return Ok(None);
            };
            match session.send_command(&outbound).await {
                Ok(()) => {}
                Err(SessionError::InvalidLine(err)) => {
                    notify(writer, &format!("Not sent: {err}"));
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(None)
}

fn notify<W: Write>(writer: &mut W, message: &str) {
    if let Err(err) = writeln!(writer, "{message}") {
        tracing::warn!(error = %err, "failed to write console message");
    }
}
