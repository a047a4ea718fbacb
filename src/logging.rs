//! Logging for plugin processes.
//!
//! Stdout belongs to the handshake line the host parses at startup, so every
//! log line this SDK or a provider emits must go to **stderr**. The helpers
//! here set up a `tracing` subscriber wired accordingly.
//!
//! # Quick Start
//!
//! ```ignore
//! use terraform_provider_sdk::{init_logging, serve};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     tracing::info!("starting provider");
//!     serve(plugin).await
//! }
//! ```
//!
//! # Environment
//!
//! `RUST_LOG` controls filtering, e.g. `info`, `debug`, or
//! `terraform_provider_sdk=debug`. Without it the default level applies.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the default logging subscriber at `info` level.
///
/// Writes to stderr, honors `RUST_LOG`, uses a compact human-readable
/// format.
///
/// # Panics
///
/// Panics if a global subscriber has already been set; use
/// [`try_init_logging`] when that can happen.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level used when `RUST_LOG` is
/// not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        )
        .init();
}

/// Try to initialize logging, returning `false` if a subscriber was already
/// set instead of panicking.
pub fn try_init_logging() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be installed once per process, so these
    // tests stick to filter parsing.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("debug").is_ok());
        assert!(EnvFilter::try_new("terraform_provider_sdk=debug").is_ok());
        assert!(EnvFilter::try_new("warn,terraform_provider_sdk=debug").is_ok());
    }
}
