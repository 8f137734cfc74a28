//! Force-release a job's hold on a lock.

use super::CliConfig;
use super::common::locksmith;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct UnlockCommand {
    /// Lock fingerprint.
    digest: String,

    /// Job whose hold is released.
    #[arg(long)]
    job_id: String,

    /// Release the run lock instead.
    #[arg(long)]
    run: bool,
}

impl UnlockCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let locksmith = locksmith(config, &self.digest, &self.job_id, self.run).await?;

        match locksmith.force_unlock().await? {
            Some(job_id) => println!("{} {} from {}", "Released".green().bold(), job_id, locksmith.keys().digest),
            None => println!("{} did not hold {}", self.job_id, locksmith.keys().digest),
        }
        Ok(())
    }
}
