//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Install the global tracing subscriber.
///
/// `CODEGRAPH_LOG` takes precedence (e.g. `CODEGRAPH_LOG=codegraph_core::query=debug`),
/// falling back to `config.filter`. Safe to call more than once; only the
/// first call has any effect.
pub fn init_tracing(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("CODEGRAPH_LOG")
            .or_else(|_| EnvFilter::try_new(&config.filter))
            .unwrap_or_else(|_| EnvFilter::new("codegraph_core=info"));

        let registry = tracing_subscriber::registry().with(filter);
        if config.json {
            registry
                .with(fmt::layer().json().with_target(true).with_thread_ids(true))
                .init();
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .init();
        }
    });
}
