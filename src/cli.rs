//! Command line interface.
//!
//! [`Cli`] carries the global flags (`--config`, `--verbose`) and one of the
//! [`Command`] subcommands: `serve`, `generate`, `show`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Progressive AI adoption roadmaps, streamed stage by stage.
#[derive(Debug, Parser)]
#[command(name = "roadmapper", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the config file (default: ./roadmapper.toml if present).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server.
    Serve {
        /// Address to bind, overriding the config file.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Generate one roadmap locally and print it.
    Generate {
        /// What the business wants to achieve.
        #[arg(long)]
        goals: String,

        /// What currently stands in the way.
        #[arg(long)]
        challenges: String,

        #[arg(long)]
        industry: Option<String>,

        #[arg(long)]
        experience_level: Option<String>,

        #[arg(long)]
        urgency: Option<String>,

        #[arg(long)]
        budget: Option<String>,

        /// Requester to account the run against, `user:<id>` or `trial:<id>`.
        #[arg(long, default_value = "user:local")]
        requester: String,
    },

    /// Print a persisted roadmap.
    Show {
        /// Job id printed by `generate` or sent in the `x-job-id` header.
        job_id: String,
    },
}
