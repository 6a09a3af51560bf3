//! Merge rules: built-in defaults sit at the bottom of the precedence stack.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the crate defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("channel.backend", "local")?
        .set_default("channel.capacity", 256_i64)?
        .set_default("channel.receive_timeout_ms", 30_000_i64)?
        .set_default("channel.nats_url", "nats://127.0.0.1:4222")?
        .set_default("channel.subject_prefix", "genpipe.tasks")?
        .set_default("watchdog.max_lifetime_ms", 600_000_i64)?
        .set_default("watchdog.heartbeat_interval_ms", 10_000_i64)?
        .set_default("workers.max_concurrent", 64_i64)
}
