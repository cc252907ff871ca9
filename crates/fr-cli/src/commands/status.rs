//! Status command for showing what the delivery ledger has recorded.

use std::io::Write;

use anyhow::Result;
use chrono::SecondsFormat;

use fr_db::Ledger;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, ledger: &Ledger, config: &Config, recent: usize) -> Result<()> {
    let summary = ledger.summary()?;

    writeln!(writer, "Feed relay status")?;
    writeln!(writer, "Ledger: {}", config.database_path.display())?;
    writeln!(writer, "Source: @{}", config.source_identity)?;
    writeln!(writer, "Relay: {} on {}:{}", config.channel, config.server, config.port)?;

    if summary.total == 0 {
        writeln!(writer, "No items recorded.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "Items: {} recorded, {} delivered, {} pending",
        summary.total, summary.delivered, summary.pending
    )?;
    writeln!(writer, "Recent:")?;
    for record in ledger.recent(recent)? {
        let state = if record.delivered { "delivered" } else { "pending" };
        writeln!(
            writer,
            "- {} @{} {state} {}",
            record.external_id,
            record.source_identity,
            record.first_seen.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
    }

    Ok(())
}
