//! Engine configuration as string key/value pairs with typed getters.

use rustc_hash::FxHashMap;
use tessera_error::{tessera_err, TesseraResult};

/// Total memory budget for lazily loaded metadata sections, in bytes.
pub const MEMORY_BUDGET_KEY: &str = "sm.memory_budget";

/// Number of threads in the shared compute pool. `0` selects the number of
/// logical CPUs.
pub const COMPUTE_CONCURRENCY_KEY: &str = "sm.compute_concurrency";

/// Codec applied to generic-tile payloads: `lz4` or `none`.
pub const GENERIC_TILE_CODEC_KEY: &str = "sm.generic_tile_codec";

const DEFAULTS: &[(&str, &str)] = &[
    (MEMORY_BUDGET_KEY, "10737418240"),
    (COMPUTE_CONCURRENCY_KEY, "0"),
    (GENERIC_TILE_CODEC_KEY, "lz4"),
];

/// Engine configuration. Unset keys fall back to built-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
    params: FxHashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            params: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl Config {
    /// A configuration holding only the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Get a parameter as a string.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Get a parameter parsed as `u64`.
    pub fn get_u64(&self, key: &str) -> TesseraResult<u64> {
        let raw = self
            .get(key)
            .ok_or_else(|| tessera_err!(InvalidArgument: "unknown config parameter {}", key))?;
        raw.parse::<u64>().map_err(
            |e| tessera_err!(InvalidArgument: "config parameter {}={} is not a u64: {}", key, raw, e),
        )
    }

    /// Get a parameter parsed as `usize`.
    pub fn get_usize(&self, key: &str) -> TesseraResult<usize> {
        Ok(self.get_u64(key)? as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_present() {
        let config = Config::new();
        assert_eq!(config.get_u64(MEMORY_BUDGET_KEY).unwrap(), 10 << 30);
        assert_eq!(config.get(GENERIC_TILE_CODEC_KEY), Some("lz4"));
    }

    #[test]
    fn set_overrides() {
        let mut config = Config::new();
        config.set(MEMORY_BUDGET_KEY, "1024");
        assert_eq!(config.get_u64(MEMORY_BUDGET_KEY).unwrap(), 1024);
    }

    #[test]
    fn bad_values_are_invalid_argument() {
        let mut config = Config::new();
        config.set(MEMORY_BUDGET_KEY, "lots");
        assert!(config.get_u64(MEMORY_BUDGET_KEY).is_err());
        assert!(config.get_u64("sm.not_a_key").is_err());
    }
}
