//! Barge - incremental asset build pipeline and dev server
//!
//! This library provides functionality to:
//! - Run configurable transformer pipelines over package source trees
//! - Rebuild incrementally as sources change, recomputing only the
//!   affected lineages
//! - Serve the built asset tree over HTTP with freshness guarantees

pub mod asset;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod graph;
pub mod output;
pub mod pipeline;
pub mod scheduler;
pub mod server;
pub mod transform;
pub mod watch;
