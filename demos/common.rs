//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
#[derive(Debug, Clone)]
pub struct Args {
    pub host: String,
    pub mac: Option<String>,
    pub debug: bool,
}

impl Args {
    /// Parse command-line arguments.
    ///
    /// The first positional argument is the device host; `MADVR_HOST` is
    /// used when it is missing.
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut positional = args.iter().filter(|a| !a.starts_with("--"));

        let host = positional
            .next()
            .cloned()
            .or_else(|| std::env::var("MADVR_HOST").ok())
            .unwrap_or_else(|| "192.168.1.50".to_string());

        Self {
            host,
            mac: positional.next().cloned(),
            debug: args.iter().any(|a| a == "--debug"),
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "madvr_client=debug"
    } else {
        "madvr_client=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Wait for Ctrl+C.
pub async fn wait_for_exit() {
    println!("Press Ctrl+C to exit...");
    tokio::signal::ctrl_c().await.ok();
}
