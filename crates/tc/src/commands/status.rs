//! Status command implementation

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::json;
use team_chat_core::home;
use team_chat_core::status::{self, TeamStatus};

use super::output;

/// Show aggregate counters for a team
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Team name
    team: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the status command
pub fn execute(args: StatusArgs) -> Result<()> {
    let result: Result<TeamStatus> = (|| {
        Ok(status::team_status(
            &home::data_root()?,
            &args.team,
            Utc::now(),
        )?)
    })();

    match result {
        Ok(status) => {
            if args.json {
                output::print_ok(json!(status));
            } else {
                println!("Team {}", status.team);
                println!("  members:            {}", status.members.join(", "));
                println!("  messages_total:     {}", status.messages_total);
                println!("  unread_total:       {}", status.unread_total);
                println!("  acked_total:        {}", status.acked_total);
                println!("  events_total:       {}", status.events_total);
                println!("  tasks_total:        {}", status.tasks_total);
                println!("  pending_deliveries: {}", status.pending_deliveries);
                println!("  dead_letter_total:  {}", status.dead_letter_total);
                println!("  malformed_total:    {}", status.malformed_total);
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
