//! Bot coordinator: connects the session, runs the poller and the console
//! side by side, and owns shutdown.
//!
//! Each task reports why it stopped through one exit channel. The first
//! report decides how the bot shuts down: operator quit and interrupts are
//! clean exits, a lost connection or a failing poller are errors. There is no
//! automatic reconnect.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use fr_db::Ledger;
use fr_feed::FeedSource;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Config;
use crate::console::{ConsoleExit, run_console};
use crate::poller::{PollError, Poller};
use crate::session::{Session, SessionError, SessionState};

/// Why the bot is shutting down.
#[derive(Debug)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM.
    Interrupted,
    /// `/quit` from the console.
    OperatorQuit(Option<String>),
    ConnectionLost(SessionError),
    PollerFailed(PollError),
    ConsoleFailed(SessionError),
}

impl ShutdownReason {
    /// Quit message sent to the server for this reason.
    fn quit_message(&self, farewell: &str) -> Option<String> {
        match self {
            Self::OperatorQuit(reason) => reason.clone(),
            _ => Some(farewell.to_string()),
        }
    }
}

/// Runs the bot until it is told to quit or a fatal error occurs.
///
/// Registration finishes before the poller and console start, so nothing is
/// relayed to a connection that has not registered yet.
pub async fn run<S, R, W>(
    config: &Config,
    ledger: Ledger,
    source: S,
    console_in: R,
    console_out: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: FeedSource + 'static,
    R: AsyncBufRead + Unpin + Send + 'static,
    W: Write + Send + 'static,
{
    let (session, reader) = Session::connect(config)
        .await
        .context("failed to connect to IRC server")?;
    let session = Arc::new(session);
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<ShutdownReason>();

    let reader_cancel = CancellationToken::new();
    let mut reader_task: JoinHandle<()> = {
        let session = Arc::clone(&session);
        let cancel = reader_cancel.clone();
        let exit_tx = exit_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = session.run_reader(reader, cancel).await {
                let _ = exit_tx.send(ShutdownReason::ConnectionLost(err));
            }
        })
    };

    let registered = tokio::select! {
        result = session.register() => Some(result),
        () = shutdown.cancelled() => None,
    };
    match registered {
        Some(Ok(())) => {}
        Some(Err(err)) => {
            reader_cancel.cancel();
            let _ = reader_task.await;
            return Err(err).context("failed to register with IRC server");
        }
        None => {
            tracing::info!("interrupted during registration");
            if let Err(err) = session.quit(Some(&config.farewell)).await {
                tracing::debug!(error = %err, "quit not sent");
            }
            reader_cancel.cancel();
            let _ = reader_task.await;
            return Ok(());
        }
    }

    let tasks = shutdown.child_token();

    let poller_task = {
        let poller = Poller::from_config(source, ledger, config);
        let session = Arc::clone(&session);
        let cancel = tasks.clone();
        let exit_tx = exit_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = poller.run(session, cancel).await {
                tracing::error!(error = %err, "poller stopped");
                let _ = exit_tx.send(ShutdownReason::PollerFailed(err));
            }
        })
    };

    let console_task = {
        let session = Arc::clone(&session);
        let cancel = tasks.clone();
        tokio::spawn(async move {
            match run_console(&session, console_in, console_out, cancel).await {
                Ok(ConsoleExit::Quit(reason)) => {
                    let _ = exit_tx.send(ShutdownReason::OperatorQuit(reason));
                }
                Ok(ConsoleExit::Eof | ConsoleExit::Cancelled) => {}
                Err(err) => {
                    let _ = exit_tx.send(ShutdownReason::ConsoleFailed(err));
                }
            }
        })
    };

    let reason = tokio::select! {
        () = shutdown.cancelled() => ShutdownReason::Interrupted,
        reason = exit_rx.recv() => reason.unwrap_or(ShutdownReason::Interrupted),
    };
    tracing::info!(?reason, "shutting down");

    tasks.cancel();
    if session.state() != SessionState::Closed {
        let message = reason.quit_message(&config.farewell);
        if let Err(err) = session.quit(message.as_deref()).await {
            tracing::warn!(error = %err, "failed to send quit");
        }
    }

    if tokio::time::timeout(config.quit_timeout(), &mut reader_task)
        .await
        .is_err()
    {
        tracing::debug!("server did not close the connection in time");
        reader_cancel.cancel();
        let _ = reader_task.await;
    }
    let _ = poller_task.await;
    let _ = console_task.await;

    match reason {
        ShutdownReason::Interrupted | ShutdownReason::OperatorQuit(_) => Ok(()),
        ShutdownReason::ConnectionLost(err) => {
            Err(anyhow::Error::new(err).context("lost connection to IRC server"))
        }
        ShutdownReason::PollerFailed(err) => Err(anyhow::Error::new(err).context("feed poller failed")),
        ShutdownReason::ConsoleFailed(err) => {
            Err(anyhow::Error::new(err).context("failed to send console input"))
        }
    }
}
