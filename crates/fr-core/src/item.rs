//! Feed items and their persisted delivery state.

use chrono::{DateTime, Utc};

/// The newest post fetched from a feed for one tracked identity.
///
/// Never persisted itself; only its identifier survives, as a
/// [`DeliveryRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledItem {
    pub external_id: String,
    pub source_identity: String,
    pub display_name: String,
    pub body: String,
}

impl PolledItem {
    /// Renders the item as a single chat line.
    ///
    /// Format: `<display_name> (@<source_identity>): <body>`. Line breaks in
    /// the body are folded into spaces so the result is always one protocol
    /// line.
    pub fn announcement(&self) -> String {
        format!(
            "{} (@{}): {}",
            flatten(&self.display_name),
            flatten(&self.source_identity),
            flatten(&self.body)
        )
    }
}

fn flatten(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ledger entry for one external item.
///
/// `delivered` only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub external_id: String,
    pub source_identity: String,
    pub delivered: bool,
    pub first_seen: DateTime<Utc>,
}
