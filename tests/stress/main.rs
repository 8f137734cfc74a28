//! Stress test suite for unique-locks
//!
//! Many requesters race for the same fingerprint on a multi-threaded runtime.
//! These tests are slower than the integration suite and are not run in CI.
//!
//! ```bash
//! cargo test --test stress -- --nocapture
//! ```

mod contention;
