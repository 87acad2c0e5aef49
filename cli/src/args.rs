//! Command-line arguments.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "polyglot")]
#[command(about = "Query language servers from the command line")]
#[command(
    after_help = "Lines and characters are zero-based. RUST_LOG filters the log output on stderr (default: warn)."
)]
pub struct Cli {
    /// Server table to use instead of the user config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Workspace root; defaults to the current directory
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List the symbols declared in a file
    Symbols { file: PathBuf },
    /// Show hover information at a position
    Hover {
        file: PathBuf,
        line: u32,
        character: u32,
    },
    /// Find where the symbol at a position is defined
    Definition {
        file: PathBuf,
        line: u32,
        character: u32,
    },
    /// Find every reference to the symbol at a position
    References {
        file: PathBuf,
        line: u32,
        character: u32,
        /// Leave the declaration itself out
        #[arg(long)]
        no_declaration: bool,
    },
    /// Compute the edits that rename the symbol at a position
    Rename {
        file: PathBuf,
        line: u32,
        character: u32,
        new_name: String,
    },
    /// List completion candidates at a position
    Completion {
        file: PathBuf,
        line: u32,
        character: u32,
    },
    /// Open a file and print the diagnostics published for it
    Diagnostics {
        file: PathBuf,
        /// How long to collect diagnostics, in milliseconds
        #[arg(long, default_value_t = 3000)]
        wait_ms: u64,
    },
    /// Show the state of every configured language server
    Status,
}

impl Command {
    /// The file the command reads, if any.
    pub fn file(&self) -> Option<&Path> {
        match self {
            Self::Symbols { file }
            | Self::Hover { file, .. }
            | Self::Definition { file, .. }
            | Self::References { file, .. }
            | Self::Rename { file, .. }
            | Self::Completion { file, .. }
            | Self::Diagnostics { file, .. } => Some(file.as_path()),
            Self::Status => None,
        }
    }
}
