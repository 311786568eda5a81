use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "msgvault",
    version,
    about = "Encrypted message store with versioned schema migrations."
)]
pub struct Cli {
    /// Store directory (defaults to ~/.msgvault)
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,
    #[arg(long, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the store or bring it to the current schema version
    Migrate,
    /// Show the persisted and current schema versions
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Pre-upgrade snapshots
    Snapshots(SnapshotArgs),
    /// Pending retry receipts
    Receipts(ReceiptArgs),
    /// Show or change store settings
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub snapshot_before_upgrade: Option<bool>,
    #[arg(long)]
    pub keep_snapshots: Option<usize>,
    #[arg(long)]
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Args)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommands,
}

#[derive(Subcommand)]
pub enum SnapshotCommands {
    List,
    /// Check every snapshot against its recorded checksum
    Verify,
    Prune {
        #[arg(long, default_value_t = 3)]
        keep: usize,
    },
}

#[derive(Args)]
pub struct ReceiptArgs {
    #[command(subcommand)]
    pub command: ReceiptCommands,
}

#[derive(Subcommand)]
pub enum ReceiptCommands {
    List {
        #[arg(long)]
        json: bool,
    },
    Add {
        author: String,
        #[arg(long, default_value_t = 1)]
        device: i32,
        #[arg(long)]
        sent: i64,
        #[arg(long)]
        received: i64,
        #[arg(long)]
        thread: i64,
    },
    Remove {
        author: String,
        #[arg(long)]
        sent: i64,
    },
}
