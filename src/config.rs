use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Time-to-live settings for the instance-scoped caches. Every cache is
/// recomputable from persistent state, so the TTL only bounds staleness,
/// not correctness.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub mapping_ttl: Duration,
    pub migration_ttl: Duration,
    pub validation_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mapping_ttl: DEFAULT_TTL,
            migration_ttl: DEFAULT_TTL,
            validation_ttl: DEFAULT_TTL,
        }
    }
}
