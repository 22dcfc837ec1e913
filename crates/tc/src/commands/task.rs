//! Task-assign and task-update: convenience wrappers that build the
//! corresponding envelopes and run them through the normal send pipeline.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::{json, Map, Value};
use team_chat_core::inbox::SendOutcome;
use team_chat_core::schema::rfc3339_millis;
use team_chat_core::{home, inbox, Envelope, MessageType};
use uuid::Uuid;

use super::output;

/// Assign a task to an agent
#[derive(Args, Debug)]
pub struct TaskAssignArgs {
    /// Team name
    team: String,

    /// Reporter agent
    #[arg(long)]
    from: String,

    /// Assignee agent
    #[arg(long)]
    to: String,

    /// Task id
    #[arg(long)]
    task_id: String,

    /// Task subject
    #[arg(long)]
    subject: String,

    /// Task details
    #[arg(long)]
    details: Option<String>,

    /// Trace id propagated to events
    #[arg(long)]
    trace_id: Option<String>,

    /// Track the delivery until acked
    #[arg(long)]
    require_ack: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Update the state of a task
#[derive(Args, Debug)]
pub struct TaskUpdateArgs {
    /// Team name
    team: String,

    /// Updating agent
    #[arg(long)]
    from: String,

    /// Recipient agent (usually the reporter)
    #[arg(long)]
    to: String,

    /// Task id
    #[arg(long)]
    task_id: String,

    /// New status
    #[arg(long)]
    status: String,

    /// Progress note
    #[arg(long)]
    note: Option<String>,

    /// Trace id propagated to events
    #[arg(long)]
    trace_id: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

fn new_message_id() -> String {
    format!("msg-{}", Uuid::new_v4())
}

#[allow(clippy::too_many_arguments)]
fn send_task_message(
    team: &str,
    kind: MessageType,
    from: &str,
    to: &str,
    task_id: &str,
    payload: Map<String, Value>,
    trace_id: Option<String>,
    require_ack: bool,
) -> Result<(String, SendOutcome)> {
    let now = Utc::now();
    let message_id = new_message_id();
    let envelope = Envelope {
        id: message_id.clone(),
        kind,
        from: from.to_string(),
        to: to.to_string(),
        payload: Value::Object(payload),
        created_at: rfc3339_millis(now),
        schema_version: 1,
        task_id: Some(task_id.to_string()),
        trace_id,
        priority: 0,
        require_ack,
        cooldown_key: None,
        cooldown_seconds: None,
        unknown_fields: Default::default(),
    };
    let outcome = inbox::send(&home::data_root()?, team, &envelope, now)?;
    Ok((message_id, outcome))
}

/// Execute the task-assign command
pub fn execute_assign(args: TaskAssignArgs) -> Result<()> {
    let mut payload = Map::new();
    payload.insert("subject".to_string(), Value::from(args.subject.clone()));
    if let Some(ref details) = args.details {
        payload.insert("details".to_string(), Value::from(details.clone()));
    }

    let result = send_task_message(
        &args.team,
        MessageType::TaskAssign,
        &args.from,
        &args.to,
        &args.task_id,
        payload,
        args.trace_id.clone(),
        args.require_ack,
    );

    match result {
        Ok((message_id, _)) => {
            if args.json {
                output::print_ok(json!({
                    "task_id": args.task_id,
                    "message_id": message_id,
                    "assignee": args.to,
                }));
            } else {
                println!(
                    "Task {} assigned to {}@{} (message {})",
                    args.task_id, args.to, args.team, message_id
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

/// Execute the task-update command
pub fn execute_update(args: TaskUpdateArgs) -> Result<()> {
    let mut payload = Map::new();
    payload.insert("status".to_string(), Value::from(args.status.clone()));
    if let Some(ref note) = args.note {
        payload.insert("note".to_string(), Value::from(note.clone()));
    }

    let result = send_task_message(
        &args.team,
        MessageType::TaskUpdate,
        &args.from,
        &args.to,
        &args.task_id,
        payload,
        args.trace_id.clone(),
        false,
    );

    match result {
        Ok((message_id, _)) => {
            if args.json {
                output::print_ok(json!({
                    "task_id": args.task_id,
                    "message_id": message_id,
                    "status": args.status,
                }));
            } else {
                println!(
                    "Task {} updated to {:?} (message {})",
                    args.task_id, args.status, message_id
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
