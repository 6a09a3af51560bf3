//! genpipe: Generation Task Queue and Streaming Pipeline
//!
//! Runs LLM generations as background workers that publish ordered events onto a
//! per-task channel, supervised by a watchdog that emits heartbeats and enforces
//! a maximum lifetime. A task pipeline consumes the channel and returns either an
//! aggregated response or a lazy stream of wire frames.

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod principal;
pub mod registry;
pub mod request;
pub mod runner;
pub mod store;
pub mod types;
pub mod watchdog;
pub mod worker;
