use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Content-addressed record repository with a signed history")]
pub struct Args {
    /// Path to KDL config file
    #[arg(short = 'c', long, default_value = "quire.kdl")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the signing key and an empty repository
    Init,

    /// Show the current head
    Status,

    /// Create a record; the key is generated unless given
    Create {
        collection: String,
        /// Record as JSON, or @path to read it from a file
        record: String,
        #[arg(long)]
        rkey: Option<String>,
        #[arg(long)]
        swap_commit: Option<String>,
        /// Skip schema validation
        #[arg(long)]
        no_validate: bool,
    },

    /// Create or replace a record
    Put {
        collection: String,
        rkey: String,
        /// Record as JSON, or @path to read it from a file
        record: String,
        #[arg(long)]
        swap_commit: Option<String>,
        #[arg(long)]
        swap_record: Option<String>,
        /// Skip schema validation
        #[arg(long)]
        no_validate: bool,
    },

    /// Read a record
    Get {
        collection: String,
        rkey: String,
        /// Commit, tree root, or record CID to read at
        #[arg(long)]
        at: Option<String>,
    },

    /// Delete a record
    Delete {
        collection: String,
        rkey: String,
        #[arg(long)]
        swap_commit: Option<String>,
        #[arg(long)]
        swap_record: Option<String>,
    },

    /// Page through a collection
    List {
        collection: String,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        cursor: Option<String>,
        /// Inclusive lower rkey bound
        #[arg(long)]
        start: Option<String>,
        /// Exclusive upper rkey bound
        #[arg(long)]
        end: Option<String>,
        #[arg(short = 'r', long)]
        reverse: bool,
    },

    /// List collection names
    Collections,

    /// Show commits, newest first
    Log {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Write the whole repository to a CAR file
    Export { output: PathBuf },

    /// Load a CAR export into an empty repository
    Import {
        input: PathBuf,
        /// Accept commits not signed by the configured key
        #[arg(long)]
        no_verify: bool,
    },
}
