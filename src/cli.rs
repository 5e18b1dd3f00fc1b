//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Privileged-access control daemon for the class notification bot.
#[derive(Parser)]
#[command(name = "chime", version, about)]
pub struct Cli {
    /// Path to the config file (defaults to the standard lookup chain)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the access-control daemon (default when no command is given)
    #[command(alias = "d")]
    Daemon,

    /// Grant a role (and its default password) to a chat id
    Grant {
        /// Chat id of the user
        chat_id: i64,

        /// Role to assign: curator or admin
        role: String,
    },

    /// List privileged users and their credential state
    #[command(alias = "ls")]
    Users,

    /// Create a default config file
    Init,
}
