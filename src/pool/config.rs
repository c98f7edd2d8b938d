//! Pool configuration.

/// Configuration for a [`PoolAllocator`](crate::pool::PoolAllocator).
///
/// Set at construction and immutable thereafter (the strict flag can be
/// toggled at runtime through
/// [`set_strict`](crate::pool::PoolAllocator::set_strict)).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of blocks carved from each page.
    pub blocks_per_page: usize,

    /// Bytes of pad canary on each side of a block. Only written and
    /// checked while `debug_checks` is on.
    pub pad_bytes: usize,

    /// Required alignment of each block's first byte. Must be a power
    /// of two; raised internally to the element's own alignment.
    pub alignment: usize,

    /// Enables per-block headers, poison signatures, pad canaries,
    /// free validation, statistics, and log-sink reporting.
    pub debug_checks: bool,

    /// Converts debug diagnostics into `Err` returns. Only meaningful
    /// while `debug_checks` is on.
    pub strict: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            blocks_per_page: 1024,
            pad_bytes: if cfg!(debug_assertions) { 2 } else { 0 },
            alignment: 4,
            debug_checks: cfg!(debug_assertions),
            strict: false,
        }
    }
}

impl PoolConfig {
    /// Full instrumentation: headers, poison, pads, validation, stats.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            blocks_per_page: 1024,
            pad_bytes: 2,
            alignment: 4,
            debug_checks: true,
            strict: false,
        }
    }

    /// Bare layout: no headers, no pads, no validation, no stats.
    #[must_use]
    pub fn production() -> Self {
        Self {
            blocks_per_page: 1024,
            pad_bytes: 0,
            alignment: 4,
            debug_checks: false,
            strict: false,
        }
    }

    /// Full instrumentation with diagnostics raised as errors.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::debug()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let debug = PoolConfig::debug();
        assert!(debug.debug_checks);
        assert_eq!(debug.pad_bytes, 2);
        assert_eq!(debug.blocks_per_page, 1024);
        assert_eq!(debug.alignment, 4);
        assert!(!debug.strict);

        let production = PoolConfig::production();
        assert!(!production.debug_checks);
        assert_eq!(production.pad_bytes, 0);

        assert!(PoolConfig::strict().strict);
    }
}
