//! Integration tests for shardscan workers.
//!
//! Workers run against the in-memory database and worker store with a paused
//! tokio clock, so no external services are needed.
//! Run: cargo test --test integration

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;
mod crash_recovery;
mod full_scan;
mod resharding;
mod runner;
