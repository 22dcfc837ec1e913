//! Read command implementation

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::json;
use team_chat_core::inbox::{self, ReadOptions, ReadPage};
use team_chat_core::home;

use super::output;

/// Read an agent's inbox, newest first
#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Team name
    team: String,

    /// Agent whose inbox to read
    #[arg(long)]
    agent: String,

    /// Only unacked messages
    #[arg(long)]
    unread: bool,

    /// Maximum messages to return
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Resume older than this message id
    #[arg(long)]
    cursor: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the read command
pub fn execute(args: ReadArgs) -> Result<()> {
    let result: Result<ReadPage> = (|| {
        let options = ReadOptions {
            unread_only: args.unread,
            limit: args.limit,
            cursor: args.cursor.clone(),
        };
        Ok(inbox::read_inbox(
            &home::data_root()?,
            &args.team,
            &args.agent,
            &options,
            Utc::now(),
        )?)
    })();

    match result {
        Ok(page) => {
            if args.json {
                output::print_ok_page(
                    json!({
                        "agent": args.agent,
                        "envelopes": page.envelopes,
                    }),
                    page.next_cursor.as_deref(),
                );
            } else {
                if page.envelopes.is_empty() {
                    println!("No messages for {}@{}", args.agent, args.team);
                }
                for envelope in &page.envelopes {
                    let mut line = format!(
                        "[{}] {} from {} at {}",
                        envelope.id, envelope.kind, envelope.from, envelope.created_at
                    );
                    if let Some(ref task_id) = envelope.task_id {
                        line.push_str(&format!(" (task {task_id})"));
                    }
                    println!("{line}");
                    println!("    {}", envelope.payload);
                }
                if let Some(ref cursor) = page.next_cursor {
                    println!("More messages available; resume with --cursor {cursor}");
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
