//! Logging setup for providers.
//!
//! Logs go to **stderr**: a provider's stdout belongs to the orchestrator
//! that launched it. Filtering follows `RUST_LOG`.
//!
//! ```bash
//! # Framework internals, including plan transformation steps
//! RUST_LOG=hemmer_provider_framework=debug ./my-provider
//!
//! # Per-attribute tracing of the plan walk
//! RUST_LOG=hemmer_provider_framework::plan=trace ./my-provider
//! ```
//!
//! Every RPC handler runs inside an `rpc.<operation>` span carrying the
//! type name of the resource or data source involved.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LEVEL: &str = "info";

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::registry().with(filter(default_level)).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Install the global subscriber at `info` unless `RUST_LOG` says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_LEVEL);
}

/// Install the global subscriber with a custom default level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
///
/// ```ignore
/// hemmer_provider_framework::init_logging_with_default("debug");
/// ```
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Install the global subscriber, returning `false` if one is already set.
///
/// Useful in tests, where several cases may try to initialize logging.
pub fn try_init_logging() -> bool {
    subscriber(DEFAULT_LEVEL).try_init().is_ok()
}
