//! Log output setup
//!
//! blockwire logs through `tracing`. Binaries call [`init`] once to get a
//! formatted subscriber whose filter comes from `BLOCKWIRE_LOG`, e.g.
//!
//! ```text
//! BLOCKWIRE_LOG=blockwire_runtime=debug ./echo
//! BLOCKWIRE_LOG=trace ./echo
//! ```
//!
//! Libraries embedding blockwire can install their own subscriber instead.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives
pub const LOG_ENV: &str = "BLOCKWIRE_LOG";

const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

/// Install the global fmt subscriber. Later calls are no-ops, and an
/// already installed global subscriber is left in place.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_target(true)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::info!("logging initialised twice without panicking");
    }
}
