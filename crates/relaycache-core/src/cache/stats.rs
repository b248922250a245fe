use serde::Serialize;

/// Counters describing how the cache store has been used since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    /// Lookups that found nothing, including ones that found an expired entry
    pub misses: u64,
    /// Entries dropped because they had expired
    pub expired: u64,
    /// Live entries dropped to make room
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
