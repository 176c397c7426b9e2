//! Cache configuration.
//!
//! Controls where artifacts are stored and how long they stay fresh, via the
//! `[cache]` section of `pixcache.toml`.

use std::path::PathBuf;

use time::Duration;

use super::keys::CacheKeyGenerator;

const DEFAULT_DIRECTORY: &str = "is-cache";
const DEFAULT_MAX_BROWSER_CACHE_DAYS: u32 = 7;
const DEFAULT_MAX_CACHE_DAYS: u32 = 365;
const DEFAULT_FOLDER_DEPTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Root directory of the physical cache.
    pub directory: PathBuf,
    /// Upper bound for the `max-age` sent to clients.
    pub max_browser_cache_age: Duration,
    /// Age after which a stored entry is treated as stale.
    pub max_cache_age: Duration,
    /// Hex length of derived cache keys.
    pub cached_name_length: usize,
    /// Number of single-character shard directories above each entry.
    pub folder_depth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            max_browser_cache_age: Duration::days(DEFAULT_MAX_BROWSER_CACHE_DAYS.into()),
            max_cache_age: Duration::days(DEFAULT_MAX_CACHE_DAYS.into()),
            cached_name_length: CacheKeyGenerator::DEFAULT_LENGTH,
            folder_depth: DEFAULT_FOLDER_DEPTH,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            directory: settings.directory.clone(),
            max_browser_cache_age: Duration::days(settings.max_browser_cache_days.into()),
            max_cache_age: Duration::days(settings.max_cache_days.into()),
            cached_name_length: settings.cached_name_length,
            folder_depth: settings.folder_depth,
        }
    }
}

impl CacheConfig {
    pub fn key_generator(&self) -> CacheKeyGenerator {
        CacheKeyGenerator::new(self.cached_name_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CacheConfig::default();
        assert_eq!(config.directory, PathBuf::from("is-cache"));
        assert_eq!(config.max_browser_cache_age, Duration::days(7));
        assert_eq!(config.max_cache_age, Duration::days(365));
        assert_eq!(config.key_generator().length(), 12);
        assert_eq!(config.folder_depth, 2);
    }
}
