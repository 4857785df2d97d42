//! Diagnostics bootstrap.
//!
//! The monitor emits a `trace` event per invalidated entry, which is far
//! too chatty for everyday use, so the default filter keeps the strata
//! crates at `debug` and everything else at `warn`. Set `STRATA_LOG`
//! (same syntax as `RUST_LOG`) to replace the whole filter.

use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter.
pub const LOG_ENV: &str = "STRATA_LOG";

const DEFAULT_FILTER: &str = "warn,strata_config=debug,strata_index=debug,strata_monitor=debug";
const REFRESH_TRACE_FILTER: &str =
    "warn,strata_config=debug,strata_index=debug,strata_monitor=trace";

/// Install the process-wide subscriber. `trace_refresh` additionally
/// enables the per-entry invalidation events. Returns `false` when a
/// subscriber was already installed.
pub fn init_logging(trace_refresh: bool) -> bool {
    let filter = match std::env::var(LOG_ENV) {
        Ok(spec) => EnvFilter::new(spec),
        Err(_) => EnvFilter::new(if trace_refresh {
            REFRESH_TRACE_FILTER
        } else {
            DEFAULT_FILTER
        }),
    };

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
