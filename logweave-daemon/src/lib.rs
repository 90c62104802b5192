//! logweave daemon library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `logweave-daemon` is used as a binary (main.rs).

pub mod cli;
pub mod daemon;
pub mod logging;
pub mod metrics_server;
pub mod sink;
pub mod source;
