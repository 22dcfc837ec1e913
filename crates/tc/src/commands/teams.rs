//! Teams command: list teams under the data root

use anyhow::Result;
use clap::Args;
use serde_json::json;
use team_chat_core::{home, status};

use super::output;

/// List teams under the data root
#[derive(Args, Debug)]
pub struct TeamsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the teams command
pub fn execute(args: TeamsArgs) -> Result<()> {
    let result: Result<Vec<String>> = (|| Ok(status::list_teams(&home::data_root()?)?))();

    match result {
        Ok(teams) => {
            if args.json {
                output::print_ok(json!({ "teams": teams }));
            } else if teams.is_empty() {
                println!("No teams found");
            } else {
                for team in teams {
                    println!("{team}");
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
