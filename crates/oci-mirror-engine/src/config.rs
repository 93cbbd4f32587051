//! Runtime options shared by the engines.

/// How an engine run is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of rules processed at the same time.
    pub concurrency: usize,

    /// Log planned deletions instead of performing them.
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            dry_run: false,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration: sequential, deleting for real.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of rules processed at the same time. Zero is treated
    /// as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enables or disables dry-run purging.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sequential() {
        let config = EngineConfig::new();
        assert_eq!(config.concurrency, 1);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(EngineConfig::new().with_concurrency(0).concurrency, 1);
        assert_eq!(EngineConfig::new().with_concurrency(8).concurrency, 8);
    }
}
