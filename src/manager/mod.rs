// Transaction coordinator.
//
// - config: builder wiring driver, pool options, logger and user handlers
// - routing: the interceptors every connection minted by the manager carries

mod config;
mod routing;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::context::{AmbientTx, Context};
use crate::driver::{Driver, TxOptions};
use crate::error::{BoxError, TxxError};
use crate::logger::TxLogger;
use crate::pool::{Conn, Database, Tx};
use crate::proxy::Handlers;

pub use config::TxManagerBuilder;
use routing::AmbientRouter;

/// Runs units of work inside a transaction that every call made with the
/// unit's [`Context`] joins implicitly.
pub struct TxManager {
    db: Database,
    log: Arc<dyn TxLogger>,
}

impl TxManager {
    #[must_use]
    pub fn builder(driver: impl Driver, dsn: impl Into<String>) -> TxManagerBuilder {
        TxManagerBuilder::new(driver, dsn)
    }

    /// Manager with default pool options and a no-op logger.
    ///
    /// # Errors
    /// Returns `TxxError` if the pool can't be built.
    pub async fn new(driver: impl Driver, dsn: impl Into<String>) -> Result<Self, TxxError> {
        Self::builder(driver, dsn).build().await
    }

    pub(crate) fn from_parts(db: Database, log: Arc<dyn TxLogger>) -> Self {
        Self { db, log }
    }

    /// Interceptors that make a connection honour the ambient transaction.
    #[must_use]
    pub fn handlers() -> Handlers {
        Handlers::new()
            .begin_tx(AmbientRouter)
            .query(AmbientRouter)
            .exec(AmbientRouter)
            .prepare(AmbientRouter)
    }

    /// The pool whose connections route through the ambient transaction.
    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Run `f` inside one transaction.
    ///
    /// `f` receives a child of `ctx` carrying the transaction; queries made
    /// through [`TxManager::db`] with that context run inside it. The
    /// transaction commits when `f` succeeds and rolls back when it fails or
    /// `ctx` is done first. Rollback and release failures go to the logger;
    /// only the first failure is returned.
    ///
    /// # Errors
    /// - `TxxError::AcquireConnection` if no connection could be checked out
    /// - `TxxError::BeginTransaction` if the transaction couldn't start, including
    ///   when `ctx` already carries one
    /// - `TxxError::UnitOfWork` with the error `f` returned
    /// - `TxxError::Canceled` / `TxxError::DeadlineExceeded` if `ctx` ended first
    /// - `TxxError::Commit` if committing failed
    pub async fn run_in_transaction<F, Fut, T, E>(
        &self,
        ctx: &Context,
        opts: TxOptions,
        f: F,
    ) -> Result<T, TxxError>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let conn = self
            .db
            .conn(ctx)
            .await
            .map_err(|e| TxxError::AcquireConnection(Box::new(e)))?;

        let result = self.run_on_conn(&conn, ctx, opts, f).await;

        if let Err(err) = conn.close().await {
            self.log.close_conn(&err);
        }
        debug!(success = result.is_ok(), "transaction connection released");
        result
    }

    async fn run_on_conn<F, Fut, T, E>(
        &self,
        conn: &Conn,
        ctx: &Context,
        opts: TxOptions,
        f: F,
    ) -> Result<T, TxxError>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let mut tx = conn
            .begin_tx(ctx, opts)
            .await
            .map_err(|e| TxxError::BeginTransaction(Box::new(e)))?;
        debug!(isolation = %opts.isolation, read_only = opts.read_only, "transaction started");

        let ambient = AmbientTx::new(conn.raw());
        let tx_ctx = ctx.with_ambient(ambient.clone());

        let outcome = {
            let _finish = ambient.finish_on_drop();
            tokio::select! {
                biased;
                res = f(tx_ctx) => res.map_err(|e| TxxError::UnitOfWork(e.into())),
                () = ctx.done() => Err(ctx.err().unwrap_or(TxxError::Canceled)),
            }
        };

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                self.rollback(&mut tx).await;
                debug!(error = %err, "transaction rolled back");
                return Err(err);
            }
        };

        let committed = match ctx.err() {
            Some(err) => Err(err),
            None => tx.commit().await,
        };
        if let Err(err) = committed {
            self.rollback(&mut tx).await;
            return Err(TxxError::Commit(Box::new(err)));
        }
        debug!("transaction committed");
        Ok(value)
    }

    async fn rollback(&self, tx: &mut Tx) {
        if let Err(err) = tx.rollback().await {
            self.log.rollback(&err);
        }
    }
}

impl fmt::Debug for TxManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxManager").field("db", &self.db).finish_non_exhaustive()
    }
}
