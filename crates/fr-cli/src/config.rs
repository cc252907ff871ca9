//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
///
/// Loaded once at startup and shared read-only by every task.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// IRC server host name.
    pub server: String,
    /// IRC server port.
    pub port: u16,
    /// Channel the bot joins and relays into.
    pub channel: String,
    pub nick: String,
    pub realname: String,
    /// Feed account whose newest post is relayed.
    pub source_identity: String,
    /// Seconds between feed polls.
    pub poll_interval_secs: u64,
    /// Upper bound on a single feed fetch.
    pub fetch_timeout_secs: u64,
    /// Base URL of the timeline API.
    pub feed_api_base: String,
    /// Bearer token for the timeline API.
    pub feed_bearer_token: Option<String>,
    /// Path to the delivery ledger database.
    pub database_path: PathBuf,
    /// Delay between registration and joining the channel.
    pub join_delay_ms: u64,
    /// How long to wait for the server to close the link after QUIT.
    pub quit_timeout_secs: u64,
    /// Number of inbound lines kept in the session history.
    pub history_limit: usize,
    /// Quit message used on interrupt and fatal errors.
    pub farewell: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("channel", &self.channel)
            .field("nick", &self.nick)
            .field("realname", &self.realname)
            .field("source_identity", &self.source_identity)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("feed_api_base", &self.feed_api_base)
            .field(
                "feed_bearer_token",
                &self.feed_bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("database_path", &self.database_path)
            .field("join_delay_ms", &self.join_delay_ms)
            .field("quit_timeout_secs", &self.quit_timeout_secs)
            .field("history_limit", &self.history_limit)
            .field("farewell", &self.farewell)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            server: "irc.libera.chat".to_string(),
            port: 6667,
            channel: "#feedrelay".to_string(),
            nick: "feedrelay".to_string(),
            realname: "feed relay bot".to_string(),
            source_identity: "newsyc150".to_string(),
            poll_interval_secs: 60,
            fetch_timeout_secs: 30,
            feed_api_base: "https://api.twitter.com".to_string(),
            feed_bearer_token: None,
            database_path: data_dir.join("ledger.db"),
            join_delay_ms: 2000,
            quit_timeout_secs: 5,
            history_limit: 256,
            farewell: "shutting down".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from default locations, optionally merging a
    /// specific file on top.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (FEEDRELAY_*)
        figment = figment.merge(Env::prefixed("FEEDRELAY_"));

        figment.extract()
    }

    /// Rejects settings the bot cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.trim().is_empty() {
            anyhow::bail!("server must not be empty");
        }
        if self.nick.trim().is_empty() || self.nick.contains(char::is_whitespace) {
            anyhow::bail!("nick must be a single non-empty word");
        }
        if self.channel.len() < 2
            || !self.channel.starts_with(['#', '&'])
            || self.channel.contains(char::is_whitespace)
        {
            anyhow::bail!("channel must start with '#' or '&': {}", self.channel);
        }
        if self.source_identity.trim().is_empty() {
            anyhow::bail!("source_identity must not be empty");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be greater than zero");
        }
        if self.history_limit == 0 {
            anyhow::bail!("history_limit must be greater than zero");
        }
        Ok(())
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub const fn join_delay(&self) -> Duration {
        Duration::from_millis(self.join_delay_ms)
    }

    pub const fn quit_timeout(&self) -> Duration {
        Duration::from_secs(self.quit_timeout_secs)
    }
}

/// Returns the platform-specific config directory for feedrelay.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("feedrelay"))
}

/// Returns the platform-specific data directory for feedrelay.
///
/// On Linux: `~/.local/share/feedrelay`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("feedrelay"))
}
