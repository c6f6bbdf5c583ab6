use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(version, about = "A sandboxed scripting language")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a source file with optional arguments
    Run {
        /// Path to the source file
        file: PathBuf,

        /// Optional arguments, exposed to the script as `args`
        args: Vec<String>,
    },

    /// Check a source file for syntax errors without running it
    Check {
        /// Path to the source file to check
        file: PathBuf,
    },

    /// Start an interactive REPL session
    Repl,
}
