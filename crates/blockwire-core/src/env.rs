//! Environment variable utilities
//!
//! Every tunable in blockwire has a compiled-in default that an
//! environment variable may override. These helpers do the parsing.
//!
//! # Usage
//!
//! ```ignore
//! use blockwire_core::env::{env_get, env_get_millis};
//!
//! let max_blocks: usize = env_get("BLOCKWIRE_MAX_BLOCKS", 16384);
//! let idle = env_get_millis("BLOCKWIRE_IDLE_WAIT_MS", 10_000);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
///
/// Unset variables and values that fail to parse both yield `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get a millisecond count from the environment as a `Duration`
#[inline]
pub fn env_get_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__BLOCKWIRE_UNSET_VAR__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_opt_none() {
        let val: Option<usize> = env_get_opt("__BLOCKWIRE_UNSET_VAR__");
        assert!(val.is_none());
    }

    #[test]
    fn test_env_get_parses_and_trims() {
        std::env::set_var("__BLOCKWIRE_TEST_NUM__", " 123 ");
        let val: usize = env_get("__BLOCKWIRE_TEST_NUM__", 0);
        assert_eq!(val, 123);
        assert_eq!(
            env_get_millis("__BLOCKWIRE_TEST_NUM__", 5),
            Duration::from_millis(123)
        );
        std::env::remove_var("__BLOCKWIRE_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse_falls_back() {
        std::env::set_var("__BLOCKWIRE_TEST_BAD__", "not_a_number");
        let val: u64 = env_get("__BLOCKWIRE_TEST_BAD__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__BLOCKWIRE_TEST_BAD__");
    }
}
