//! Print the key family of a fingerprint.

use crate::key::KeySet;
use anyhow::Result;
use clap::Args;
use serde_json::json;

#[derive(Args)]
pub struct KeysCommand {
    /// Lock fingerprint.
    digest: String,

    /// Derive the run-lock keys instead.
    #[arg(long)]
    run: bool,

    /// Print a JSON object instead of one key per line.
    #[arg(long)]
    json: bool,
}

impl KeysCommand {
    pub fn execute(self) -> Result<()> {
        let keys = if self.run {
            KeySet::run(&self.digest)
        } else {
            KeySet::new(self.digest)
        };

        if self.json {
            let value = json!({
                "digest": keys.digest,
                "exists": keys.exists,
                "locked": keys.holders,
                "queued": keys.queued,
                "primed": keys.primed,
                "available": keys.permits,
                "grabbed": keys.obtained,
                "version": keys.version,
                "changelog": keys.changelog,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            print!("{keys}");
        }
        Ok(())
    }
}
