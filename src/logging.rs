//! Diagnostic logging to stderr.
//!
//! Filtered by the `ROWSHEET_LOG` environment variable using `EnvFilter`
//! syntax, e.g. `ROWSHEET_LOG=debug` or `ROWSHEET_LOG=rowsheet::formula=debug`
//! to see `print()`/`debug()` output from formulas. Defaults to `warn`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "ROWSHEET_LOG";

pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}
