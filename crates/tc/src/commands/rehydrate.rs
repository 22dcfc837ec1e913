//! Rehydrate command implementation

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::json;
use team_chat_core::home;
use team_chat_core::rehydrate::{self, RehydrateSummary};

use super::output;

/// Rebuild all derived state from the append-only logs
#[derive(Args, Debug)]
pub struct RehydrateArgs {
    /// Team name
    team: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the rehydrate command
pub fn execute(args: RehydrateArgs) -> Result<()> {
    let result: Result<RehydrateSummary> = (|| {
        Ok(rehydrate::rehydrate(
            &home::data_root()?,
            &args.team,
            Utc::now(),
        )?)
    })();

    match result {
        Ok(summary) => {
            if args.json {
                output::print_ok(json!(summary));
            } else {
                println!(
                    "Rehydrated {}: {} message(s), {} event(s), {} snapshot(s), \
                     {} ack(s), {} pending delivery(ies), {} malformed line(s)",
                    args.team,
                    summary.messages_indexed,
                    summary.events_indexed,
                    summary.snapshots_written,
                    summary.acks_rebuilt,
                    summary.pending_rebuilt,
                    summary.malformed_lines
                );
            }
            Ok(())
        }
        Err(e) => {
            if args.json {
                output::print_err(&e);
            }
            Err(e)
        }
    }
}
