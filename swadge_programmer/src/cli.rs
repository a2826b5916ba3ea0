//! Command line arguments

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "swadge_programmer")]
#[command(version, about = "Flash every Swadge plugged into this machine", long_about = None)]
pub struct Cli {
    /// Run without a window and log progress instead
    #[arg(long)]
    pub headless: bool,

    /// Settings file to use instead of the one in the user config directory
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
