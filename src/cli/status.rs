//! Report whether a job holds a lock.

use super::CliConfig;
use super::common::locksmith;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct StatusCommand {
    /// Lock fingerprint.
    digest: String,

    /// Job to check.
    #[arg(long)]
    job_id: String,

    /// Check the run lock instead.
    #[arg(long)]
    run: bool,
}

impl StatusCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let locksmith = locksmith(config, &self.digest, &self.job_id, self.run).await?;

        if locksmith.is_locked().await? {
            println!("{} {} holds {}", "locked".green().bold(), self.job_id, locksmith.keys().digest);
        } else {
            println!("{} {} does not hold {}", "free".yellow().bold(), self.job_id, locksmith.keys().digest);
        }
        Ok(())
    }
}
