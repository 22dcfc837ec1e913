//! Doctor commands: consistency checks over logs and derived state

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Subcommand};
use serde_json::json;
use team_chat_core::home;
use team_chat_core::status::{self, DoctorReport};

use super::output;

/// Consistency checks
#[derive(Args, Debug)]
pub struct DoctorArgs {
    #[command(subcommand)]
    command: DoctorCommand,
}

#[derive(Subcommand, Debug)]
enum DoctorCommand {
    /// Cross-check indexes against the append-only logs
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Team name
    team: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute a doctor subcommand
pub fn execute(args: DoctorArgs) -> Result<()> {
    match args.command {
        DoctorCommand::Check(args) => execute_check(args),
    }
}

fn execute_check(args: CheckArgs) -> Result<()> {
    let result: Result<DoctorReport> = (|| {
        Ok(status::doctor_check(
            &home::data_root()?,
            &args.team,
            Utc::now(),
        )?)
    })();

    match result {
        Ok(report) => {
            if args.json {
                output::print_ok(json!(report));
            } else {
                if report.ok {
                    println!("OK: indexes are consistent with the logs");
                } else {
                    println!("Inconsistencies found:");
                    for id in &report.missing_from_message_index {
                        println!("  message {id} missing from index (run rehydrate)");
                    }
                    for id in &report.orphaned_message_index {
                        println!("  message index entry {id} has no log record");
                    }
                    for id in &report.digest_mismatches {
                        println!("  message {id} digest mismatch (log line changed)");
                    }
                    for id in &report.missing_from_event_index {
                        println!("  event {id} missing from index (run rehydrate)");
                    }
                    for id in &report.orphaned_event_index {
                        println!("  event index entry {id} has no log record");
                    }
                }
                println!("  malformed fingerprints: {}", report.malformed_fingerprints);
                println!("  pending deliveries:     {}", report.pending_deliveries);
                println!("  dead letters:           {}", report.dead_letter_total);
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
