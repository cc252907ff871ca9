//! Periodic feed polling with ledger-backed deduplication.
//!
//! Only the newest item is fetched on each tick. Items posted in a burst
//! between two ticks are therefore not all relayed; only the latest one is.

use std::sync::Arc;
use std::time::Duration;

use fr_core::PolledItem;
use fr_db::{Ledger, LedgerError};
use fr_feed::{FeedError, FeedSource};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::Config;
use crate::session::{Session, SessionError};

/// Errors that stop the poller. Fetch failures are not among them.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("failed to deliver item {external_id}: {source}")]
    Delivery {
        external_id: String,
        #[source]
        source: SessionError,
    },
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new item was sent and marked delivered.
    Delivered,
    /// A recorded but undelivered item was sent again and marked.
    Redelivered,
    /// The newest item had already been delivered.
    AlreadyDelivered,
    /// The feed could not be read; nothing changed.
    FetchFailed,
}

/// Relays the newest feed item of one identity into the session's channel.
pub struct Poller<S> {
    source: S,
    ledger: Ledger,
    identity: String,
    interval: Duration,
    fetch_timeout: Duration,
}

impl<S: FeedSource> Poller<S> {
    pub fn new(
        source: S,
        ledger: Ledger,
        identity: impl Into<String>,
        interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            ledger,
            identity: identity.into(),
            interval,
            fetch_timeout,
        }
    }

    pub fn from_config(source: S, ledger: Ledger, config: &Config) -> Self {
        Self::new(
            source,
            ledger,
            config.source_identity.clone(),
            config.poll_interval(),
            config.fetch_timeout(),
        )
    }

    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Fetches the newest item and delivers it unless the ledger says it
    /// already was.
    ///
    /// The item is recorded before it is sent and marked after, so a crash in
    /// between leads to one redelivery on the next tick.
    pub async fn tick(&mut self, session: &Session) -> Result<TickOutcome, PollError> {
        let item = match fetch_latest(&self.source, &self.identity, self.fetch_timeout).await {
            Ok(item) => item,
            Err(err) => {
                tracing::warn!(identity = %self.identity, error = %err, "feed fetch failed, skipping tick");
                return Ok(TickOutcome::FetchFailed);
            }
        };

        let outcome = match self.ledger.lookup(&item.external_id)? {
            Some(record) if record.delivered => {
                tracing::debug!(external_id = %item.external_id, "item already delivered");
                return Ok(TickOutcome::AlreadyDelivered);
            }
            Some(_) => {
                tracing::info!(external_id = %item.external_id, "redelivering item that was never marked delivered");
                TickOutcome::Redelivered
            }
            None => {
                self.ledger
                    .record_seen(&item.external_id, &item.source_identity)?;
                TickOutcome::Delivered
            }
        };

        session
            .say_to_channel(&item.announcement())
            .await
            .map_err(|source| PollError::Delivery {
                external_id: item.external_id.clone(),
                source,
            })?;
        self.ledger.mark_delivered(&item.external_id)?;
        tracing::info!(external_id = %item.external_id, identity = %item.source_identity, "relayed item");
        Ok(outcome)
    }

    /// Ticks immediately, then every interval, until cancelled or a tick
    /// fails with a ledger or delivery error.
    pub async fn run(
        mut self,
        session: Arc<Session>,
        cancel: CancellationToken,
    ) -> Result<(), PollError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(identity = %self.identity, interval = ?self.interval, "poller started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                outcome = self.tick(&session) => {
                    let outcome = outcome?;
                    tracing::debug!(?outcome, "poll tick finished");
                }
            }
        }

        tracing::debug!("poller stopped");
        Ok(())
    }
}

async fn fetch_latest<S: FeedSource>(
    source: &S,
    identity: &str,
    timeout: Duration,
) -> Result<PolledItem, FeedError> {
    tokio::time::timeout(timeout, source.latest_item(identity))
        .await
        .unwrap_or(Err(FeedError::Timeout(timeout)))
}
