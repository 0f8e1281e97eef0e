pub mod config;
pub mod connection;

use std::fmt;

use bb8::{ErrorSink, Pool, State};
use tracing::warn;

use crate::context::Context;
use crate::driver::{ExecResult, Rows, Statement, Value};
use crate::error::TxxError;
use crate::proxy::{Handlers, ProxyConnection, ProxyConnector};

pub use config::{PoolOptions, PoolOptionsBuilder};
pub use connection::{Conn, Tx};

/// Pool of proxied connections.
///
/// Every operation checks a connection out, runs through the proxy (and so
/// through its interceptors) and hands it back. Query, exec and prepare under
/// an ambient transaction run through the same interceptors on the
/// transaction's connection without a second checkout.
#[derive(Clone)]
pub struct Database {
    pool: Pool<ProxyConnector>,
    handlers: Handlers,
}

impl Database {
    #[must_use]
    pub fn builder() -> PoolOptionsBuilder {
        PoolOptionsBuilder::new()
    }

    /// Build the pool and establish its minimum idle connections.
    ///
    /// # Errors
    /// Returns `TxxError::ConnectionError` if the pool can't be built.
    pub async fn open(connector: ProxyConnector, opts: &PoolOptions) -> Result<Self, TxxError> {
        let handlers = connector.handlers().clone();
        let pool = Pool::builder()
            .max_size(opts.max_size)
            .min_idle(opts.min_idle)
            .connection_timeout(opts.connection_timeout)
            .test_on_check_out(opts.test_on_check_out)
            .error_sink(Box::new(TracingErrorSink))
            .build(connector)
            .await
            .map_err(|e| TxxError::ConnectionError(format!("failed to build pool: {e}")))?;
        Ok(Self { pool, handlers })
    }

    /// Check a connection out, giving up when `ctx` is done.
    ///
    /// # Errors
    /// Returns `TxxError::Pool` on checkout timeout, the connector's failure, or
    /// the context's error.
    pub async fn conn(&self, ctx: &Context) -> Result<Conn, TxxError> {
        ctx.check()?;
        tokio::select! {
            res = self.pool.get_owned() => Ok(Conn::new(res?)),
            () = ctx.done() => Err(ctx.err().unwrap_or(TxxError::Canceled)),
        }
    }

    /// # Errors
    /// Returns `TxxError` if checkout, argument checking or execution fails.
    pub async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
    ) -> Result<ExecResult, TxxError> {
        if let Some(proxy) = self.ambient_proxy(ctx) {
            let args = connection::named_args(&proxy, args)?;
            return proxy.exec_context(ctx, query, &args).await;
        }
        let conn = self.conn(ctx).await?;
        let args = conn.named_args(args)?;
        conn.exec_context(ctx, query, &args).await
    }

    /// # Errors
    /// Returns `TxxError` if checkout, argument checking or the query fails.
    pub async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[Value],
    ) -> Result<Rows, TxxError> {
        if let Some(proxy) = self.ambient_proxy(ctx) {
            let args = connection::named_args(&proxy, args)?;
            return proxy.query_context(ctx, query, &args).await;
        }
        let conn = self.conn(ctx).await?;
        let args = conn.named_args(args)?;
        conn.query_context(ctx, query, &args).await
    }

    /// Prepare a statement.
    ///
    /// Outside a transaction the statement holds its pooled connection until
    /// dropped. Inside one it runs on the transaction's connection and fails
    /// with `TxxError::TransactionDone` once the transaction has finished.
    ///
    /// # Errors
    /// Returns `TxxError` if checkout or preparation fails.
    pub async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError> {
        if let Some(proxy) = self.ambient_proxy(ctx) {
            return proxy.prepare_context(ctx, query).await;
        }
        let conn = self.conn(ctx).await?;
        conn.prepare_owned(ctx, query).await
    }

    /// # Errors
    /// Returns `TxxError` if checkout fails or the driver doesn't answer.
    pub async fn ping(&self, ctx: &Context) -> Result<(), TxxError> {
        let conn = self.conn(ctx).await?;
        conn.ping(ctx).await
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.pool.state()
    }

    fn ambient_proxy(&self, ctx: &Context) -> Option<ProxyConnection> {
        ctx.ambient()
            .map(|tx| ProxyConnection::from_shared(tx.conn(), self.handlers.clone()))
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.pool.state();
        f.debug_struct("Database")
            .field("connections", &state.connections)
            .field("idle_connections", &state.idle_connections)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct TracingErrorSink;

impl ErrorSink<TxxError> for TracingErrorSink {
    fn sink(&self, error: TxxError) {
        warn!(error = %error, "connection pool error");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<TxxError>> {
        Box::new(*self)
    }
}
