//! Configuration knobs for the cache layer, the ambient counterpart to the
//! original's CLI/AppData configuration (out of scope per §1, but the
//! in-process knobs it set remain).

/// Initial timebase mode and any other cache-layer startup configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// `0` selects deadline mode; anything else selects tick mode with
    /// that interval in microseconds, mirroring `Timebase::setTickInterval`.
    pub tick_interval_usec: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { tick_interval_usec: 0 }
    }
}
