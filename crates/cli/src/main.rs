#![forbid(unsafe_code)]

//! `pointsctl`: operator interface to the points ledger.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod support;

const LOG_ENV: &str = "POINTS_LEDGER_LOG";

/// Points ledger and rank progression.
#[derive(Parser)]
#[command(name = "pointsctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the ledger database
    #[arg(long, global = true, env = "POINTS_LEDGER_DIR", default_value = ".points_ledger")]
    storage_dir: PathBuf,

    /// How long a write waits on a locked database, in milliseconds
    #[arg(long, global = true, env = "POINTS_LEDGER_BUSY_TIMEOUT_MS", default_value_t = 5_000)]
    busy_timeout_ms: u64,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the rank ladder
    Ladder {
        #[command(subcommand)]
        action: LadderCommands,
    },

    /// Manage members
    Member {
        #[command(subcommand)]
        action: MemberCommands,
    },

    /// Administrative adjustment of one member's points
    Award {
        member: String,

        /// Signed delta, e.g. +250 or -40
        #[arg(allow_hyphen_values = true)]
        delta: String,

        reason: String,

        /// Administrator making the change
        #[arg(long)]
        actor: String,
    },

    /// Award points for an approved task
    ApproveTask {
        member: String,
        task_id: String,
        award: i64,

        /// Task title, recorded as the history reason
        #[arg(long)]
        title: String,

        #[arg(long)]
        reviewer: String,
    },

    /// Credit points for a verified donation
    Donate {
        member: String,
        points: i64,

        #[arg(long)]
        donation: String,

        #[arg(long)]
        actor: Option<String>,
    },

    /// Apply the same adjustment to several members
    Bulk {
        /// Signed delta, e.g. +20 or -5
        #[arg(allow_hyphen_values = true)]
        delta: String,

        reason: String,

        #[arg(long)]
        actor: String,

        #[arg(required = true)]
        members: Vec<String>,
    },

    /// Deduct points for missed deadlines listed in a JSON file
    Sweep { file: PathBuf },

    /// Assign a rank explicitly, including manual-only ranks
    Promote {
        member: String,
        rank: String,

        #[arg(long)]
        actor: String,
    },

    /// Members ordered by points
    Leaderboard {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Recent audit entries
    Audit {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Only entries with this action tag
        #[arg(long)]
        action: Option<String>,

        /// Only entries by this actor
        #[arg(long)]
        actor: Option<String>,
    },
}

#[derive(Subcommand)]
enum LadderCommands {
    /// Install a ladder from a YAML or JSON file and re-rank members
    Install { file: PathBuf },

    /// Show the installed ladder
    Show,
}

#[derive(Subcommand)]
enum MemberCommands {
    /// Register a member with zero points
    Add {
        id: String,

        #[arg(long)]
        name: Option<String>,
    },

    /// Points, rank, progress and recent history
    Show {
        id: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// List members
    List {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = commands::Context::new(cli.storage_dir, cli.busy_timeout_ms, cli.json);
    match cli.command {
        Commands::Ladder { action } => match action {
            LadderCommands::Install { file } => commands::ladder::install(&ctx, &file),
            LadderCommands::Show => commands::ladder::show(&ctx),
        },
        Commands::Member { action } => match action {
            MemberCommands::Add { id, name } => commands::members::add(&ctx, &id, name),
            MemberCommands::Show { id, limit } => commands::members::show(&ctx, &id, limit),
            MemberCommands::List { limit, offset } => commands::members::list(&ctx, limit, offset),
        },
        Commands::Award {
            member,
            delta,
            reason,
            actor,
        } => commands::points::award(&ctx, &actor, &member, &delta, &reason),
        Commands::ApproveTask {
            member,
            task_id,
            award,
            title,
            reviewer,
        } => commands::points::approve_task(&ctx, &reviewer, &member, task_id, title, award),
        Commands::Donate {
            member,
            points,
            donation,
            actor,
        } => commands::points::donate(&ctx, actor.as_deref(), &member, donation, points),
        Commands::Bulk {
            delta,
            reason,
            actor,
            members,
        } => commands::points::bulk(&ctx, &actor, &delta, reason, members),
        Commands::Sweep { file } => commands::points::sweep(&ctx, &file),
        Commands::Promote {
            member,
            rank,
            actor,
        } => commands::points::promote(&ctx, &actor, &member, &rank),
        Commands::Leaderboard { limit } => commands::reports::leaderboard(&ctx, limit),
        Commands::Audit {
            limit,
            action,
            actor,
        } => commands::reports::audit(&ctx, limit, action.as_deref(), actor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_deltas_parse_as_values() {
        let cli = Cli::try_parse_from([
            "pointsctl", "award", "m1", "-40", "late report", "--actor", "admin",
        ])
        .expect("parse");
        match cli.command {
            Commands::Award { delta, .. } => assert_eq!(delta, "-40"),
            _ => panic!("expected award"),
        }
    }

    #[test]
    fn bulk_requires_members() {
        assert!(Cli::try_parse_from(["pointsctl", "bulk", "+5", "thanks", "--actor", "a"]).is_err());
    }
}
