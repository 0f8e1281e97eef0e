use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bb8::PooledConnection;
use tracing::{debug, warn};

use crate::context::Context;
use crate::driver::{
    ExecResult, NamedValue, RawConnection, Rows, Statement, Transaction, TxOptions, Value,
};
use crate::error::TxxError;
use crate::proxy::{ProxyConnection, ProxyConnector};

/// A connection checked out of a [`crate::Database`]; goes back to the pool on drop.
///
/// Statements prepared on it stop working once it is back in the pool.
pub struct Conn {
    inner: PooledConnection<'static, ProxyConnector>,
    released: Arc<AtomicBool>,
}

impl Conn {
    pub(crate) fn new(inner: PooledConnection<'static, ProxyConnector>) -> Self {
        Self {
            inner,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The proxy wrapping this pooled connection.
    #[must_use]
    pub fn proxy(&self) -> &ProxyConnection {
        &self.inner
    }

    /// Escape hatch: the driver connection under the proxy and the pool.
    #[must_use]
    pub fn raw(&self) -> Arc<dyn RawConnection> {
        self.inner.raw()
    }

    /// Evict this connection instead of returning it to the pool.
    pub fn mark_broken(&self) {
        self.inner.mark_broken();
    }

    /// Turn positional values into driver arguments, running them past the
    /// driver's value checker when it has one.
    ///
    /// # Errors
    /// Returns the checker's rejection.
    pub fn named_args(&self, values: &[Value]) -> Result<Vec<NamedValue>, TxxError> {
        named_args(&self.inner, values)
    }

    /// # Errors
    /// Returns `TxxError` if the proxy or driver fails.
    pub async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, TxxError> {
        self.inner.exec_context(ctx, query, args).await
    }

    /// # Errors
    /// Returns `TxxError` if the proxy or driver fails.
    pub async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<Rows, TxxError> {
        self.inner.query_context(ctx, query, args).await
    }

    /// # Errors
    /// Returns `TxxError` if the proxy or driver fails.
    pub async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError> {
        let inner = self.inner.prepare_context(ctx, query).await?;
        Ok(Box::new(PooledStatement {
            inner,
            released: Arc::clone(&self.released),
            _conn: None,
        }))
    }

    /// Prepare a statement that keeps this checkout until it is dropped.
    pub(crate) async fn prepare_owned(
        self,
        ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError> {
        let inner = self.inner.prepare_context(ctx, query).await?;
        Ok(Box::new(PooledStatement {
            inner,
            released: Arc::clone(&self.released),
            _conn: Some(self),
        }))
    }

    /// # Errors
    /// Returns `TxxError` if the proxy or driver fails.
    pub async fn ping(&self, ctx: &Context) -> Result<(), TxxError> {
        self.inner.ping(ctx).await
    }

    /// Begin a transaction on this connection.
    ///
    /// # Errors
    /// Returns `TxxError` if the proxy, its interceptors or the driver refuse.
    pub async fn begin_tx(&self, ctx: &Context, opts: TxOptions) -> Result<Tx, TxxError> {
        let inner = self.inner.begin_tx(ctx, opts).await?;
        Ok(Tx::new(inner, self.inner.broken_flag()))
    }

    /// Give the connection back to the pool.
    ///
    /// A connection marked broken is closed here and then evicted.
    ///
    /// # Errors
    /// Returns the driver's close failure for a broken connection.
    pub async fn close(self) -> Result<(), TxxError> {
        if !self.inner.is_broken() {
            return Ok(());
        }
        debug!("closing broken connection");
        self.inner.close().await
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.released.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn").field("inner", &*self.inner).finish()
    }
}

/// Turn positional values into driver arguments, running them past the
/// proxy's value checker when the driver has one.
pub(crate) fn named_args(
    proxy: &ProxyConnection,
    values: &[Value],
) -> Result<Vec<NamedValue>, TxxError> {
    let mut args = NamedValue::positional(values);
    for arg in &mut args {
        match proxy.check_named_value(arg) {
            Ok(()) | Err(TxxError::UnsupportedOperation(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(args)
}

/// Statement bound to one checkout of a pooled connection.
struct PooledStatement {
    inner: Box<dyn Statement>,
    released: Arc<AtomicBool>,
    // Dropped after `inner`.
    _conn: Option<Conn>,
}

impl PooledStatement {
    fn ensure_checked_out(&self) -> Result<(), TxxError> {
        if self.released.load(Ordering::Acquire) {
            Err(TxxError::ConnectionError(
                "statement's connection was returned to the pool".into(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Statement for PooledStatement {
    fn num_input(&self) -> Option<usize> {
        self.inner.num_input()
    }

    async fn exec(&self, ctx: &Context, args: &[NamedValue]) -> Result<ExecResult, TxxError> {
        self.ensure_checked_out()?;
        self.inner.exec(ctx, args).await
    }

    async fn query(&self, ctx: &Context, args: &[NamedValue]) -> Result<Rows, TxxError> {
        self.ensure_checked_out()?;
        self.inner.query(ctx, args).await
    }

    async fn close(&self) -> Result<(), TxxError> {
        self.inner.close().await
    }
}

/// An open transaction on a [`Conn`].
///
/// Dropping it while still open rolls it back in the background and marks the
/// connection broken.
pub struct Tx {
    inner: Option<Box<dyn Transaction>>,
    broken: Arc<AtomicBool>,
}

impl Tx {
    fn new(inner: Box<dyn Transaction>, broken: Arc<AtomicBool>) -> Self {
        Self {
            inner: Some(inner),
            broken,
        }
    }

    fn open_mut(&mut self) -> Result<&mut Box<dyn Transaction>, TxxError> {
        self.inner.as_mut().ok_or(TxxError::TransactionDone)
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.is_none()
    }

    /// Commit. The transaction stays open if the driver fails, so it can still
    /// be rolled back.
    ///
    /// # Errors
    /// Returns `TxxError::TransactionDone` if already finished, or the driver's failure.
    pub async fn commit(&mut self) -> Result<(), TxxError> {
        self.open_mut()?.commit().await?;
        self.inner = None;
        Ok(())
    }

    /// Roll back. A failed rollback leaves the connection in an unknown state,
    /// so it is marked broken and the transaction counts as finished.
    ///
    /// # Errors
    /// Returns `TxxError::TransactionDone` if already finished, or the driver's failure.
    pub async fn rollback(&mut self) -> Result<(), TxxError> {
        let result = self.open_mut()?.rollback().await;
        self.inner = None;
        if result.is_err() {
            self.broken.store(true, Ordering::Release);
        }
        result
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            self.broken.store(true, Ordering::Release);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(err) = inner.rollback().await {
                        warn!(error = %err, "rollback of dropped transaction failed");
                    }
                });
            } else {
                warn!("open transaction dropped outside a tokio runtime; connection evicted");
            }
        }
    }
}
