//! Tracing bootstrap for the smoke client.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,chat_smoke=debug,chat_rest=debug";

/// Install the global fmt subscriber.
///
/// Filter precedence: `RUST_LOG`, then `ACADEMY_CHAT_LOG`, then the built-in
/// default.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(filter_from_env())
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(value) = env::var("ACADEMY_CHAT_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}
