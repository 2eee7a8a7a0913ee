//! Configuration for the sync engine.

use stash_remote::RetryPolicy;

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Maximum entities requested per change-feed page.
    pub page_size: u32,
    /// Records read from the store per scan while listing.
    pub scan_batch: usize,
    /// Retry policy applied to every remote call.
    pub retry: RetryPolicy,
    /// Submit pending mutations after each pull.
    pub flush_after_pull: bool,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            page_size: 100,
            scan_batch: 256,
            retry: RetryPolicy::default(),
            flush_after_pull: true,
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the scan batch size.
    pub fn with_scan_batch(mut self, size: usize) -> Self {
        self.scan_batch = size.max(1);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables flushing after a pull.
    pub fn with_flush_after_pull(mut self, flush: bool) -> Self {
        self.flush_after_pull = flush;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_page_size(3)
            .with_scan_batch(0)
            .with_retry(RetryPolicy::no_retry())
            .with_flush_after_pull(false);

        assert_eq!(config.page_size, 3);
        assert_eq!(config.scan_batch, 1);
        assert_eq!(config.retry.max_attempts, 1);
        assert!(!config.flush_after_pull);
    }
}
