//! Purge every key of a lock except its changelog.

use super::CliConfig;
use super::common::locksmith;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct DeleteCommand {
    /// Lock fingerprint.
    digest: String,

    /// Purge the run lock instead.
    #[arg(long)]
    run: bool,
}

impl DeleteCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        // The job id only shows up in the changelog entry
        let locksmith = locksmith(config, &self.digest, "unique-locks-cli", self.run).await?;

        let removed = locksmith.force_delete().await?;
        println!("{} {} keys of {}", "Deleted".green().bold(), removed, locksmith.keys().digest);
        Ok(())
    }
}
