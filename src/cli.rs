//! # Command-Line Interface (spec §4.11 ambient configuration)
//!
//! Argument parsing for the `dicey-demo` binary: one `Parser` struct,
//! styled help output, and `-v`/`-vv` verbosity controlling the structured
//! log level rather than a separate `--log-level` flag.

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, Subcommand,
};

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Run a Dicey server or make a one-shot client call against one.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write detailed logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start a server and register a small demo object tree
    Serve {
        /// Socket path (Unix) or pipe name (Windows); defaults to a per-pid address
        #[arg(short = 'a', long)]
        address: Option<String>,
    },
    /// Connect to a running server and Get a property
    Get {
        #[arg(short = 'a', long)]
        address: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        trait_name: String,
        #[arg(long)]
        element: String,
    },
}
