//! Key namespace for lock fingerprints.
//!
//! Every fingerprint owns a fixed family of store keys. The names are a wire
//! contract: any process (or the `unique-locks` CLI) that derives keys from the
//! same fingerprint observes the same lock state.
//!
//! ```text
//! {digest}:EXISTS     current holder id
//! {digest}:LOCKED     holder id -> acquisition time (ms)
//! {digest}:QUEUED     requesters waiting for admission
//! {digest}:PRIMED     admitted requesters waiting for a permit
//! {digest}:AVAILABLE  free permit tokens
//! {digest}:GRABBED    checked-out permit tokens
//! {digest}:VERSION    permit pool configuration (counter, limit, minted)
//! {digest}:CHANGELOG  append-only audit entries
//! ```

use crate::constants::RUN_SUFFIX;
use std::fmt;

/// The store keys derived from one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySet {
    /// The fingerprint the keys were derived from.
    pub digest: String,
    /// Marker holding the current holder id.
    pub exists: String,
    /// Registry of holder ids and their acquisition time.
    pub holders: String,
    /// Requesters not yet admitted.
    pub queued: String,
    /// Requesters admitted and waiting for a permit.
    pub primed: String,
    /// Free permit tokens.
    pub permits: String,
    /// Checked-out permit tokens.
    pub obtained: String,
    /// Permit pool configuration.
    pub version: String,
    /// Audit trail.
    pub changelog: String,
}

impl KeySet {
    /// Derive the key family of `digest`.
    pub fn new(digest: impl Into<String>) -> Self {
        let digest = digest.into();
        let key = |suffix: &str| format!("{digest}:{suffix}");

        Self {
            exists: key("EXISTS"),
            holders: key("LOCKED"),
            queued: key("QUEUED"),
            primed: key("PRIMED"),
            permits: key("AVAILABLE"),
            obtained: key("GRABBED"),
            version: key("VERSION"),
            changelog: key("CHANGELOG"),
            digest,
        }
    }

    /// Derive the key family of the run lock belonging to `digest`.
    pub fn run(digest: &str) -> Self {
        Self::new(run_digest(digest))
    }

    /// Keys in the order every atomic operation expects them.
    pub fn to_vec(&self) -> Vec<String> {
        vec![
            self.exists.clone(),
            self.holders.clone(),
            self.queued.clone(),
            self.primed.clone(),
            self.permits.clone(),
            self.obtained.clone(),
            self.version.clone(),
            self.changelog.clone(),
        ]
    }

    /// Keys that carry lock state, i.e. everything but the changelog.
    pub fn state_keys(&self) -> [&str; 7] {
        [
            &self.exists,
            &self.holders,
            &self.queued,
            &self.primed,
            &self.permits,
            &self.obtained,
            &self.version,
        ]
    }
}

impl fmt::Display for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in self.to_vec() {
            writeln!(f, "{key}")?;
        }
        Ok(())
    }
}

/// Fingerprint of the run lock guarding execution of `digest`.
pub fn run_digest(digest: &str) -> String {
    format!("{digest}{RUN_SUFFIX}")
}
