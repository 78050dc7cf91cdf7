use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "smartmark")]
#[command(about = "Manage a synchronized bookmark collection")]
pub struct Cli {
    /// Configuration file (defaults to ~/.smartmark/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database holding the collection
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Owner whose collection is opened
    #[arg(long, global = true)]
    pub owner: Option<String>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the collection, newest first
    List {
        /// Only show bookmarks whose title or url contains this text
        #[arg(long)]
        filter: Option<String>,
    },
    /// Save a new bookmark
    Add {
        url: String,
        /// Title to show instead of the host name
        #[arg(long)]
        title: Option<String>,
    },
    /// Record a visit to a bookmark
    Visit { id: String },
    /// Remove a bookmark
    Delete { id: String },
}
