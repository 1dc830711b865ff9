use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "disk-catalog")]
#[command(about = "Searchable catalog of files across removable volumes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Attach a volume and index it (delta if it was scanned before)
    Index {
        /// Mount path of the volume
        path: PathBuf,
        /// Stable volume identity; defaults to the canonical mount path
        #[arg(long)]
        volume_id: Option<String>,
        /// Display name; defaults to the last path component
        #[arg(long)]
        name: Option<String>,
        /// Discard existing records and rebuild from scratch
        #[arg(long)]
        full: bool,
    },
    /// Compute content hashes for duplicate candidates on a volume
    Hash {
        volume_id: String,
        path: PathBuf,
    },
    /// Full-text search over file names and paths
    Search {
        text: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// List the direct children of a directory on a volume
    Browse {
        volume_id: String,
        /// Parent path relative to the volume root; empty for the root
        #[arg(default_value = "")]
        parent: String,
    },
    /// Show files present on more than one volume
    Duplicates {
        /// Volume ids to treat as backups; every other volume is a source
        #[arg(long = "backup")]
        backups: Vec<String>,
    },
    /// List known volumes and bring mounted ones up to date
    Volumes {
        /// Currently mounted volumes as ID=PATH
        #[arg(long = "mounted")]
        mounted: Vec<String>,
    },
    /// Exclude a volume from indexing
    Exclude { volume_id: String },
    /// Include a previously excluded volume
    Include { volume_id: String },
    /// Delete a volume and all of its records
    DeleteVolume {
        volume_id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show or change the persisted index settings
    Settings {
        #[arg(long)]
        duplicate_detection: Option<bool>,
        #[arg(long)]
        add_excluded_dir: Vec<String>,
        #[arg(long)]
        add_excluded_extension: Vec<String>,
        #[arg(long)]
        add_ignore_pattern: Vec<String>,
    },
    /// Reopen the store, clearing stale side files
    Recover,
    /// Print configuration values
    PrintConfig,
}
