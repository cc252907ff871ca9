//! The bot's single IRC connection.
//!
//! A [`Session`] owns the write half of the transport. Every outbound line
//! goes through [`Session::send`], which holds one async mutex for the whole
//! write-and-flush, so the poller, the console and the keepalive replies can
//! share the connection without interleaving bytes on the wire. The read half
//! is handed back to the caller and driven by [`Session::run_reader`] on its
//! own task.

use std::collections::VecDeque;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use fr_core::protocol::validate_line;
use fr_core::{InboundEvent, InboundLine, LineError, OutboundCommand};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::Config;

/// Longest inbound line kept, terminator included. Longer lines are dropped.
const MAX_LINE_BYTES: u64 = 8192;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be opened.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    /// `register` was called more than once.
    #[error("session is already registered")]
    AlreadyRegistered,
    /// The session has quit or lost its connection.
    #[error("session is closed")]
    Closed,
    /// The line would break protocol framing.
    #[error("invalid outbound line: {0}")]
    InvalidLine(#[from] LineError),
    /// Reading from or writing to the transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
    /// The server closed the connection while the session was live.
    #[error("connection closed by server")]
    ConnectionLost,
}

/// Lifecycle of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Disconnected,
    /// Registration lines are being sent.
    Connecting,
    /// Registered, waiting to join the channel.
    Connected,
    Joined,
    Closed,
}

/// Identity and tuning of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub channel: String,
    pub nick: String,
    pub realname: String,
    pub join_delay: Duration,
    pub history_limit: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel: config.channel.clone(),
            nick: config.nick.clone(),
            realname: config.realname.clone(),
            join_delay: config.join_delay(),
            history_limit: config.history_limit,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of a TCP session, ready for [`Session::run_reader`].
pub type SessionReader = BufReader<OwnedReadHalf>;

/// The single protocol connection shared by all bot tasks.
pub struct Session {
    settings: SessionSettings,
    endpoint: String,
    writer: Mutex<BoxedWriter>,
    state: StdMutex<SessionState>,
    history: StdMutex<VecDeque<InboundEvent>>,
}

impl Session {
    /// Wraps an already open transport. The session starts disconnected;
    /// call [`Session::register`] to perform the handshake.
    pub fn new(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        endpoint: impl Into<String>,
        settings: SessionSettings,
    ) -> Self {
        let history = VecDeque::with_capacity(settings.history_limit.min(1024));
        Self {
            settings,
            endpoint: endpoint.into(),
            writer: Mutex::new(Box::new(writer)),
            state: StdMutex::new(SessionState::Disconnected),
            history: StdMutex::new(history),
        }
    }

    /// Opens a TCP connection to the configured server.
    pub async fn connect(config: &Config) -> Result<(Self, SessionReader), SessionError> {
        let endpoint = format!("{}:{}", config.server, config.port);
        let stream = TcpStream::connect((config.server.as_str(), config.port))
            .await
            .map_err(|source| SessionError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;
        tracing::info!(%endpoint, "connected");

        let (read_half, write_half) = stream.into_split();
        let session = Self::new(write_half, endpoint, SessionSettings::from_config(config));
        Ok((session, BufReader::new(read_half)))
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channel(&self) -> &str {
        &self.settings.channel
    }

    /// Snapshot of the most recent inbound lines, oldest first.
    pub fn history(&self) -> Vec<InboundEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Sets the state and returns the previous one.
    fn transition(&self, next: SessionState) -> SessionState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }

    /// Sends nick and user registration, then joins the channel after the
    /// configured settle delay.
    ///
    /// Returns once the join line is written. May only be called once.
    pub async fn register(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                SessionState::Disconnected => *state = SessionState::Connecting,
                SessionState::Closed => return Err(SessionError::Closed),
                _ => return Err(SessionError::AlreadyRegistered),
            }
        }

        self.send_command(&OutboundCommand::Nick(self.settings.nick.clone()))
            .await?;
        self.send_command(&OutboundCommand::User {
            username: self.settings.nick.clone(),
            realname: self.settings.realname.clone(),
        })
        .await?;
        self.advance(SessionState::Connected);

        tokio::time::sleep(self.settings.join_delay).await;
        self.send_command(&OutboundCommand::Join(self.settings.channel.clone()))
            .await?;
        self.advance(SessionState::Joined);
        tracing::info!(channel = %self.settings.channel, nick = %self.settings.nick, "joined channel");
        Ok(())
    }

    /// Moves forward to `next` unless the session closed in the meantime.
    fn advance(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state < next {
            *state = next;
        }
    }

    /// Writes one line followed by CRLF.
    ///
    /// Safe to call from any number of tasks; each line is written and
    /// flushed while holding the writer lock.
    pub async fn send(&self, line: &str) -> Result<(), SessionError> {
        validate_line(line)?;
        if self.state() == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        let framed = format!("{line}\r\n");
        let mut writer = self.writer.lock().await;
        let written = match writer.write_all(framed.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(err) => Err(err),
        };
        drop(writer);

        if let Err(err) = written {
            tracing::error!(error = %err, "write to server failed");
            self.transition(SessionState::Closed);
            return Err(SessionError::Transport(err));
        }
        tracing::debug!("-> {line}");
        Ok(())
    }

    pub async fn send_command(&self, command: &OutboundCommand) -> Result<(), SessionError> {
        self.send(&command.to_string()).await
    }

    /// Sends `text` to the session's channel.
    pub async fn say_to_channel(&self, text: &str) -> Result<(), SessionError> {
        self.send_command(&OutboundCommand::Privmsg {
            target: self.settings.channel.clone(),
            text: text.to_string(),
        })
        .await
    }

    /// Sends QUIT and closes the session.
    ///
    /// Delivery is best-effort: servers only show quit messages from clients
    /// that have been connected for a while, and the caller is expected to
    /// exit shortly after.
    pub async fn quit(&self, reason: Option<&str>) -> Result<(), SessionError> {
        let sent = self
            .send_command(&OutboundCommand::Quit(reason.map(str::to_string)))
            .await;
        self.transition(SessionState::Closed);
        tracing::info!(reason = reason.unwrap_or_default(), "quit sent");
        sent
    }

    /// Reads server lines until end of stream or cancellation.
    ///
    /// Keepalive probes are answered immediately and not recorded. End of
    /// stream after [`Session::quit`] is a clean shutdown; any other end of
    /// stream is [`SessionError::ConnectionLost`]. Lines longer than
    /// [`MAX_LINE_BYTES`] are discarded whole.
    pub async fn run_reader<R>(&self, mut reader: R, cancel: CancellationToken) -> Result<(), SessionError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        let mut discarding = false;
        loop {
            buf.clear();
            let mut limited = (&mut reader).take(MAX_LINE_BYTES);
            let read = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("reader cancelled");
                    return Ok(());
                }
                read = limited.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => return self.end_of_stream(None),
                Ok(n) if n as u64 >= MAX_LINE_BYTES && !buf.ends_with(b"\n") => {
                    if !discarding {
                        tracing::warn!(endpoint = %self.endpoint, limit = MAX_LINE_BYTES, "discarding oversized line");
                    }
                    discarding = true;
                }
                Ok(_) if discarding => discarding = false,
                Ok(_) => {
                    let raw = String::from_utf8_lossy(&buf);
                    self.handle_line(&raw).await?;
                }
                Err(err) => return self.end_of_stream(Some(err)),
            }
        }
    }

    fn end_of_stream(&self, err: Option<std::io::Error>) -> Result<(), SessionError> {
        let previous = self.transition(SessionState::Closed);
        if previous == SessionState::Closed {
            tracing::debug!(endpoint = %self.endpoint, "server closed the connection after quit");
            return Ok(());
        }
        match err {
            Some(err) => {
                tracing::error!(endpoint = %self.endpoint, error = %err, "read from server failed");
                Err(SessionError::Transport(err))
            }
            None => {
                tracing::error!(endpoint = %self.endpoint, "server closed the connection");
                Err(SessionError::ConnectionLost)
            }
        }
    }

    async fn handle_line(&self, raw: &str) -> Result<(), SessionError> {
        let trimmed = raw.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(());
        }

        let line = InboundLine::parse(trimmed);
        if let InboundLine::KeepaliveProbe { token } = &line {
            tracing::debug!(%token, "keepalive probe");
            return match self.send_command(&OutboundCommand::Pong(token.clone())).await {
                Err(SessionError::Closed) => {
                    tracing::debug!("ping after quit, not answered");
                    Ok(())
                }
                result => result,
            };
        }

        match &line {
            InboundLine::Error { message } => tracing::warn!(%message, "server error"),
            InboundLine::Registration { code, text } => {
                tracing::debug!(code, %text, "registration reply");
            }
            _ => tracing::info!("<- {trimmed}"),
        }
        self.remember(InboundEvent::new(trimmed, &line, Utc::now()));
        Ok(())
    }

    fn remember(&self, event: InboundEvent) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.settings.history_limit.max(1) {
            history.pop_front();
        }
        history.push_back(event);
    }
}
