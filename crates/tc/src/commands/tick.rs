//! Tick command: drive the delivery guard's retry schedule
//!
//! Ticks are externally driven; `--now` pins the clock so retry and
//! dead-letter behavior can be exercised without waiting.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::json;
use team_chat_core::delivery::{self, TickReport};
use team_chat_core::schema::parse_rfc3339;
use team_chat_core::{home, StoreError};

use super::output;

/// Advance retry/dead-letter schedules for require-ack sends
#[derive(Args, Debug)]
pub struct TickArgs {
    /// Team name
    team: String,

    /// Evaluate the schedule as of this RFC 3339 instant (default: now)
    #[arg(long)]
    now: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the tick command
pub fn execute(args: TickArgs) -> Result<()> {
    let result: Result<TickReport> = (|| {
        let now = match args.now {
            Some(ref raw) => parse_rfc3339(raw).ok_or_else(|| StoreError::Schema {
                reason: format!("--now {raw:?} is not RFC 3339"),
            })?,
            None => Utc::now(),
        };
        Ok(delivery::tick(&home::data_root()?, &args.team, now)?)
    })();

    match result {
        Ok(report) => {
            if args.json {
                output::print_ok(json!({
                    "retried": report.retried,
                    "dead_lettered": report.dead_lettered,
                }));
            } else {
                println!(
                    "Tick: {} retried, {} dead-lettered",
                    report.retried.len(),
                    report.dead_lettered.len()
                );
                for id in &report.retried {
                    println!("  retried {id}");
                }
                for id in &report.dead_lettered {
                    println!("  dead-lettered {id}");
                }
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
