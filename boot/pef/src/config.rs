//! Loader Configuration
//!
//! Knobs for the decompressor and the symbol resolver. Defaults reproduce
//! the boot-time behavior.

/// How exports are located in the loader section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupStrategy {
    /// Scan every export in table order; the first matching name wins
    #[default]
    Linear,
    /// Walk only the hash chain the name falls into
    Hashed,
}

/// PI-data decompression settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnpackConfig {
    /// Fail when the instruction stream ends before the section is filled
    pub require_exact_fill: bool,
    /// Refuse sections whose unpacked size exceeds this many bytes
    pub max_unpacked_size: Option<usize>,
}

impl UnpackConfig {
    /// Require the stream to describe every byte of the section
    pub fn with_exact_fill(mut self, enabled: bool) -> Self {
        self.require_exact_fill = enabled;
        self
    }

    /// Cap the unpacked size
    pub fn with_max_unpacked_size(mut self, limit: usize) -> Self {
        self.max_unpacked_size = Some(limit);
        self
    }

    /// Whether `len` is within the configured cap
    pub fn permits(&self, len: usize) -> bool {
        self.max_unpacked_size.is_none_or(|limit| len <= limit)
    }
}

/// Symbol resolver settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolverConfig {
    /// Export lookup strategy
    pub lookup: LookupStrategy,
    /// Settings for sections unpacked during resolution
    pub unpack: UnpackConfig,
}

impl ResolverConfig {
    /// Select the lookup strategy
    pub fn with_lookup(mut self, lookup: LookupStrategy) -> Self {
        self.lookup = lookup;
        self
    }

    /// Replace the unpack settings
    pub fn with_unpack(mut self, unpack: UnpackConfig) -> Self {
        self.unpack = unpack;
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
