//! Migration configuration.

use crate::error::MigrationError;

/// Default number of records requested per export page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default number of records written per create request.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Migration configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Records requested per export page.
    pub page_size: usize,
    /// Records written per create request. Self-referential collections are
    /// always written in one request.
    pub chunk_size: usize,
    /// Run every stage except the writes; the target is neither reset nor
    /// written.
    pub dry_run: bool,
}

impl MigrationConfig {
    /// Create a configuration with default sizes.
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            dry_run: false,
        }
    }

    /// Set the export page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the replay chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reject unusable sizes.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.page_size == 0 {
            return Err(MigrationError::InvalidConfig {
                reason: "page_size must be at least 1".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(MigrationError::InvalidConfig {
                reason: "chunk_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MigrationConfig::default();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = MigrationConfig::new()
            .with_page_size(50)
            .with_chunk_size(10)
            .with_dry_run(true);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.chunk_size, 10);
        assert!(config.dry_run);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let err = MigrationConfig::new().with_chunk_size(0).validate().unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
        assert!(MigrationConfig::new().with_page_size(0).validate().is_err());
    }
}
