use std::sync::Arc;

use crate::driver::Driver;
use crate::error::TxxError;
use crate::logger::{NopLogger, TxLogger};
use crate::pool::{Database, PoolOptions};
use crate::proxy::{Handlers, ProxyConnector};

use super::TxManager;

/// Fluent builder for a [`TxManager`] and the [`Database`] it owns.
pub struct TxManagerBuilder {
    driver: Arc<dyn Driver>,
    dsn: String,
    pool: PoolOptions,
    logger: Arc<dyn TxLogger>,
    handlers: Handlers,
}

impl TxManagerBuilder {
    #[must_use]
    pub fn new(driver: impl Driver, dsn: impl Into<String>) -> Self {
        Self {
            driver: Arc::new(driver),
            dsn: dsn.into(),
            pool: PoolOptions::default(),
            logger: Arc::new(NopLogger),
            handlers: Handlers::new(),
        }
    }

    #[must_use]
    pub fn pool_options(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn max_connections(mut self, max_size: u32) -> Self {
        self.pool.max_size = max_size;
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: impl TxLogger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Extra interceptors. They wrap the transaction routing, so they see every
    /// call before it is redirected.
    #[must_use]
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Open the pool and return the manager.
    ///
    /// # Errors
    ///
    /// Returns `TxxError` if the pool can't be built.
    pub async fn build(self) -> Result<TxManager, TxxError> {
        let handlers = self.handlers.merge(TxManager::handlers());
        let connector = ProxyConnector::from_shared(self.driver, self.dsn, handlers);
        let db = Database::open(connector, &self.pool).await?;
        Ok(TxManager::from_parts(db, self.logger))
    }
}
