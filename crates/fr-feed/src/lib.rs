//! Timeline feed integration for the feed relay bot.
//!
//! Provides the [`FeedSource`] seam the poller depends on, and
//! [`TimelineClient`], an HTTP implementation that reads the newest status
//! of an account from a v1.1-style `user_timeline` endpoint.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use fr_core::PolledItem;
use serde::Deserialize;
use thiserror::Error;

/// Default request timeout for API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_TIMELINE_PATH: &str = "/1.1/statuses/user_timeline.json";

/// Feed fetch errors.
///
/// All of these are transient from the poller's point of view: the tick is
/// skipped and the next one tries again.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The provided bearer token was invalid.
    #[error("invalid bearer token: {reason}")]
    InvalidToken { reason: &'static str },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// API returned an error response.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The timeline has no items.
    #[error("timeline for {identity} is empty")]
    Empty { identity: String },
    /// The fetch did not finish in time.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of the most recent item for a tracked identity.
pub trait FeedSource: Send + Sync {
    /// Fetches the single newest item posted by `identity`.
    fn latest_item(
        &self,
        identity: &str,
    ) -> impl Future<Output = Result<PolledItem, FeedError>> + Send;
}

/// HTTP timeline client.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct TimelineClient {
    http: reqwest::Client,
    api_base: String,
    bearer_token: String,
}

impl fmt::Debug for TimelineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimelineClient")
            .field("api_base", &self.api_base)
            .field("bearer_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl TimelineClient {
    /// Creates a new client for `api_base` (e.g. `https://api.twitter.com`).
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty or whitespace-only, or if the
    /// HTTP client fails to build.
    pub fn new(
        api_base: impl Into<String>,
        bearer_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let bearer_token = bearer_token.into();

        if bearer_token.is_empty() {
            return Err(FeedError::InvalidToken {
                reason: "bearer token cannot be empty",
            });
        }
        if bearer_token.trim().is_empty() {
            return Err(FeedError::InvalidToken {
                reason: "bearer token cannot be whitespace-only",
            });
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FeedError::ClientBuild)?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bearer_token,
        })
    }
}

impl FeedSource for TimelineClient {
    async fn latest_item(&self, identity: &str) -> Result<PolledItem, FeedError> {
        let url = format!("{}{USER_TIMELINE_PATH}", self.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("screen_name", identity),
                ("count", "1"),
                ("tweet_mode", "extended"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(parse_api_error(status.as_u16(), &body).unwrap_or_else(|| {
                FeedError::Api {
                    status: status.as_u16(),
                    message: body,
                }
            }));
        }

        parse_latest(identity, &body)
    }
}

#[derive(Debug, Deserialize)]
struct Status {
    id_str: Option<String>,
    id: Option<u64>,
    full_text: Option<String>,
    text: Option<String>,
    user: User,
}

#[derive(Debug, Deserialize)]
struct User {
    name: String,
    screen_name: String,
}

/// Extracts the newest item from a timeline response body.
fn parse_latest(identity: &str, body: &str) -> Result<PolledItem, FeedError> {
    let statuses: Vec<Status> =
        serde_json::from_str(body).map_err(|err| FeedError::InvalidResponse(err.to_string()))?;
    let Some(status) = statuses.into_iter().next() else {
        return Err(FeedError::Empty {
            identity: identity.to_string(),
        });
    };

    let external_id = status
        .id_str
        .filter(|id| !id.is_empty())
        .or_else(|| status.id.map(|id| id.to_string()))
        .ok_or_else(|| FeedError::InvalidResponse("status has no id".to_string()))?;
    let body = status
        .full_text
        .or(status.text)
        .ok_or_else(|| FeedError::InvalidResponse(format!("status {external_id} has no text")))?;

    Ok(PolledItem {
        external_id,
        source_identity: status.user.screen_name,
        display_name: status.user.name,
        body,
    })
}

fn parse_api_error(status: u16, body: &str) -> Option<FeedError> {
    #[derive(Deserialize)]
    struct ErrorPayload {
        errors: Vec<ErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ErrorDetails {
        message: String,
    }

    let payload = serde_json::from_str::<ErrorPayload>(body).ok()?;
    let message = payload
        .errors
        .into_iter()
        .map(|error| error.message)
        .collect::<Vec<_>>()
        .join("; ");
    (!message.is_empty()).then_some(FeedError::Api { status, message })
}
