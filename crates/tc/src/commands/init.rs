//! Init command implementation

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::json;
use team_chat_core::{home, status};

use super::output;

/// Create a team skeleton and seed empty indexes
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Team name
    team: String,

    /// Comma-separated member agent names
    #[arg(long)]
    members: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the init command
pub fn execute(args: InitArgs) -> Result<()> {
    let members: Vec<String> = args
        .members
        .split(',')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();

    let result: Result<()> = (|| {
        status::init_team(&home::data_root()?, &args.team, &members, Utc::now())?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            if args.json {
                output::print_ok(json!({
                    "team": args.team,
                    "members": members,
                }));
            } else {
                println!(
                    "Initialized team {} with {} member(s): {}",
                    args.team,
                    members.len(),
                    members.join(", ")
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
