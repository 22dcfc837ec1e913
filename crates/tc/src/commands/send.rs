//! Send command implementation

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::json;
use team_chat_core::inbox::SendOutcome;
use team_chat_core::schema::rfc3339_millis;
use team_chat_core::{home, inbox, Envelope, MessageType, StoreError};

use super::output;

/// Send a message to an agent's inbox
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Team name
    team: String,

    /// Sender agent
    #[arg(long)]
    from: String,

    /// Recipient agent
    #[arg(long)]
    to: String,

    /// Message type (message, task_assign, task_update, decision_required,
    /// idle_notification, nudge)
    #[arg(long = "type")]
    message_type: String,

    /// Unique message id
    #[arg(long)]
    message_id: String,

    /// Payload as a JSON object
    #[arg(long)]
    payload: String,

    /// Track the delivery until acked, retrying and dead-lettering
    #[arg(long)]
    require_ack: bool,

    /// Cooldown key for nudge suppression
    #[arg(long)]
    cooldown_key: Option<String>,

    /// Cooldown window in seconds
    #[arg(long)]
    cooldown_seconds: Option<i64>,

    /// Trace id propagated to events
    #[arg(long)]
    trace_id: Option<String>,

    /// Related task id
    #[arg(long)]
    task_id: Option<String>,

    /// Message priority (default 0)
    #[arg(long)]
    priority: Option<i64>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

fn parse_payload(raw: &str) -> Result<serde_json::Value, StoreError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| StoreError::Schema {
            reason: format!("payload is not valid JSON: {e}"),
        })?;
    if !value.is_object() {
        return Err(StoreError::Schema {
            reason: "payload must be a JSON object".to_string(),
        });
    }
    Ok(value)
}

/// Execute the send command
pub fn execute(args: SendArgs) -> Result<()> {
    let result: Result<SendOutcome> = (|| {
        let now = Utc::now();
        let envelope = Envelope {
            id: args.message_id.clone(),
            kind: MessageType::parse(&args.message_type)?,
            from: args.from.clone(),
            to: args.to.clone(),
            payload: parse_payload(&args.payload)?,
            created_at: rfc3339_millis(now),
            schema_version: 1,
            task_id: args.task_id.clone(),
            trace_id: args.trace_id.clone(),
            priority: args.priority.unwrap_or(0),
            require_ack: args.require_ack,
            cooldown_key: args.cooldown_key.clone(),
            cooldown_seconds: args.cooldown_seconds,
            unknown_fields: Default::default(),
        };
        Ok(inbox::send(&home::data_root()?, &args.team, &envelope, now)?)
    })();

    match result {
        Ok(outcome) => {
            if args.json {
                output::print_ok(json!({
                    "message_id": args.message_id,
                    "to": args.to,
                    "team": args.team,
                    "outcome": outcome_str(&outcome),
                }));
            } else {
                match outcome {
                    SendOutcome::Delivered => {
                        println!("Message {} sent to {}@{}", args.message_id, args.to, args.team);
                    }
                    SendOutcome::Duplicate => {
                        println!(
                            "Message {} already delivered to {}@{} (no-op)",
                            args.message_id, args.to, args.team
                        );
                    }
                    SendOutcome::CooldownSuppressed => {
                        println!("Message {} suppressed by cooldown", args.message_id);
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

fn outcome_str(outcome: &SendOutcome) -> &'static str {
    match outcome {
        SendOutcome::Delivered => "delivered",
        SendOutcome::Duplicate => "duplicate",
        SendOutcome::CooldownSuppressed => "cooldown_suppressed",
    }
}
