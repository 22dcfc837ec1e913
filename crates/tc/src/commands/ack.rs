//! Ack command implementation

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::json;
use team_chat_core::acks::{self, AckOutcome};
use team_chat_core::home;

use super::output;

/// Acknowledge a message
#[derive(Args, Debug)]
pub struct AckArgs {
    /// Team name
    team: String,

    /// Acknowledging agent
    #[arg(long)]
    agent: String,

    /// Message id to acknowledge
    #[arg(long)]
    message_id: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the ack command
pub fn execute(args: AckArgs) -> Result<()> {
    let result: Result<AckOutcome> = (|| {
        Ok(acks::ack_message(
            &home::data_root()?,
            &args.team,
            &args.agent,
            &args.message_id,
            Utc::now(),
        )?)
    })();

    match result {
        Ok(outcome) => {
            let record = outcome.record();
            if args.json {
                output::print_ok(json!({
                    "message_id": record.message_id,
                    "acked_by": record.acked_by,
                    "acked_at": record.acked_at,
                    "already_acked": matches!(outcome, AckOutcome::AlreadyAcked(_)),
                }));
            } else {
                match outcome {
                    AckOutcome::Recorded(record) => {
                        println!("Acked {} (by {})", record.message_id, record.acked_by);
                    }
                    AckOutcome::AlreadyAcked(record) => {
                        println!(
                            "Message {} already acked by {} at {}",
                            record.message_id, record.acked_by, record.acked_at
                        );
                    }
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
