//! unique-locks CLI entry point
//!
//! Parses arguments, runs the command and renders failures with
//! [`user_friendly_error`] before exiting non-zero.

use anyhow::Result;
use clap::Parser;
use unique_locks::cli;
use unique_locks::core::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
