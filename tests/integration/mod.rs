//! Integration test suite for unique-locks
//!
//! End-to-end tests of the lock protocol and the `unique-locks` binary. They run
//! against the in-memory store and finish quickly; most use tokio's paused clock
//! so timing assertions are exact.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! UNIQUE_LOCKS_REDIS_URL=redis://127.0.0.1:6379/15 cargo test --test integration redis
//! ```
//!
//! # Test Organization
//!
//! - **scenarios**: locksmith behavior across several requesters
//! - **strategies**: the lifecycle strategies as a dispatcher drives them
//! - **cli**: the `unique-locks` binary
//! - **config**: settings file discovery and environment overrides
//! - **redis**: the same scenarios against a live Redis server (opt-in)

mod cli;
mod config;
mod redis;
mod scenarios;
