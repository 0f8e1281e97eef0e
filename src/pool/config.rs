use std::time::Duration;

use crate::error::TxxError;
use crate::proxy::ProxyConnector;

use super::Database;

/// Options for the connection pool behind a [`Database`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_size: u32,
    pub min_idle: Option<u32>,
    pub connection_timeout: Duration,
    pub test_on_check_out: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: None,
            connection_timeout: Duration::from_secs(30),
            test_on_check_out: true,
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn builder() -> PoolOptionsBuilder {
        PoolOptionsBuilder::new()
    }
}

/// Fluent builder for pool options.
#[derive(Debug, Clone, Default)]
pub struct PoolOptionsBuilder {
    opts: PoolOptions,
}

impl PoolOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_size(mut self, max_size: u32) -> Self {
        self.opts.max_size = max_size;
        self
    }

    #[must_use]
    pub fn min_idle(mut self, min_idle: Option<u32>) -> Self {
        self.opts.min_idle = min_idle;
        self
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.opts.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn test_on_check_out(mut self, test: bool) -> Self {
        self.opts.test_on_check_out = test;
        self
    }

    #[must_use]
    pub fn finish(self) -> PoolOptions {
        self.opts
    }

    /// Build a [`Database`] pooling connections from `connector`.
    ///
    /// # Errors
    ///
    /// Returns `TxxError` if the pool can't establish its minimum connections.
    pub async fn build(self, connector: ProxyConnector) -> Result<Database, TxxError> {
        Database::open(connector, &self.finish()).await
    }
}
