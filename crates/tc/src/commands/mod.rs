//! CLI command dispatch and execution

use anyhow::Result;
use clap::{Parser, Subcommand};
use team_chat_core::StoreError;

mod ack;
mod doctor;
mod init;
mod output;
mod read;
mod rehydrate;
mod send;
mod status;
mod task;
mod teams;
mod tick;
mod trace;

/// tc - file-backed messaging control plane for agent teams
#[derive(Parser, Debug)]
#[command(
    name = "tc",
    version,
    about = "File-backed messaging control plane for agent teams",
    long_about = "A thin CLI over the teams/ file-based API: append-only inboxes, \
                  dated event logs, task snapshots, ack tracking, and delivery retries"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a team skeleton and seed empty indexes
    Init(init::InitArgs),

    /// Send a message to an agent's inbox
    Send(send::SendArgs),

    /// Assign a task to an agent
    TaskAssign(task::TaskAssignArgs),

    /// Update the state of a task
    TaskUpdate(task::TaskUpdateArgs),

    /// Read an agent's inbox, newest first
    Read(read::ReadArgs),

    /// Acknowledge a message
    Ack(ack::AckArgs),

    /// Show aggregate counters for a team
    Status(status::StatusArgs),

    /// Follow one trace id through the event log
    Trace(trace::TraceArgs),

    /// Rebuild all derived state from the append-only logs
    Rehydrate(rehydrate::RehydrateArgs),

    /// Advance retry/dead-letter schedules for require-ack sends
    Tick(tick::TickArgs),

    /// List teams under the data root
    Teams(teams::TeamsArgs),

    /// Consistency checks (doctor check)
    Doctor(doctor::DoctorArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Init(args) => init::execute(args),
            Commands::Send(args) => send::execute(args),
            Commands::TaskAssign(args) => task::execute_assign(args),
            Commands::TaskUpdate(args) => task::execute_update(args),
            Commands::Read(args) => read::execute(args),
            Commands::Ack(args) => ack::execute(args),
            Commands::Status(args) => status::execute(args),
            Commands::Trace(args) => trace::execute(args),
            Commands::Rehydrate(args) => rehydrate::execute(args),
            Commands::Tick(args) => tick::execute(args),
            Commands::Teams(args) => teams::execute(args),
            Commands::Doctor(args) => doctor::execute(args),
        }
    }
}

/// Exit codes: 2 for configuration/bootstrap errors, 1 otherwise.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<StoreError>() {
        Some(e) if e.is_config_error() => 2,
        _ => 1,
    }
}
