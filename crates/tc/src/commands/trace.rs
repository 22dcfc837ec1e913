//! Trace command implementation

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::json;
use team_chat_core::events::{self, TracePage};
use team_chat_core::home;

use super::output;

/// Follow one trace id through the event log, in chronological order
#[derive(Args, Debug)]
pub struct TraceArgs {
    /// Team name
    team: String,

    /// Trace id to follow
    #[arg(long)]
    trace_id: String,

    /// Maximum events to return
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Resume after this event id
    #[arg(long)]
    cursor: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the trace command
pub fn execute(args: TraceArgs) -> Result<()> {
    let result: Result<TracePage> = (|| {
        Ok(events::trace(
            &home::data_root()?,
            &args.team,
            &args.trace_id,
            args.limit,
            args.cursor.as_deref(),
            Utc::now(),
        )?)
    })();

    match result {
        Ok(page) => {
            if args.json {
                output::print_ok_page(
                    json!({
                        "trace_id": args.trace_id,
                        "events": page.events,
                    }),
                    page.next_cursor.as_deref(),
                );
            } else {
                if page.events.is_empty() {
                    println!("No events for trace {}", args.trace_id);
                }
                for event in &page.events {
                    let subject = event.subject_id.as_deref().unwrap_or("-");
                    println!("[{}] {} {} at {}", event.id, event.kind.as_str(), subject, event.ts);
                }
                if let Some(ref cursor) = page.next_cursor {
                    println!("More events available; resume with --cursor {cursor}");
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
