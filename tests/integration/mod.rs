//! Integration tests for the generation pipeline

mod channel_local;
mod config_loading;
mod support;
mod watchdog_timing;
