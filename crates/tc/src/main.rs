//! tc - file-backed team collaboration control plane
//!
//! A thin CLI over the `teams/` file-based API: append-only inboxes and
//! event logs, task snapshots, ack tracking, and delivery retries.

use clap::Parser;

mod commands;

use commands::Cli;

fn main() {
    team_chat_core::logging::init();

    let cli = Cli::parse();
    tracing::debug!("parsed command: {cli:?}");

    if let Err(e) = cli.execute() {
        eprintln!("Error: {e:#}");
        std::process::exit(commands::exit_code(&e));
    }
}
