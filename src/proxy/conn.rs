use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::context::Context;
use crate::driver::{
    ConnBeginTx, ConnPrepareContext, ExecResult, ExecerContext, NamedValue, NamedValueChecker,
    Pinger, QueryerContext, RawConnection, Rows, SessionResetter, Statement, Transaction,
    TxOptions,
};
use crate::error::TxxError;

use super::middleware::Handlers;

/// Wraps a raw driver connection so every context-aware call runs through the
/// installed [`Handlers`].
///
/// Optional operations are only forwarded when the raw connection advertises
/// them; otherwise they fail with [`TxxError::UnsupportedOperation`].
pub struct ProxyConnection {
    raw: Arc<dyn RawConnection>,
    handlers: Handlers,
    broken: Arc<AtomicBool>,
}

impl ProxyConnection {
    #[must_use]
    pub fn new(raw: Box<dyn RawConnection>, handlers: Handlers) -> Self {
        Self::from_shared(Arc::from(raw), handlers)
    }

    pub(crate) fn from_shared(raw: Arc<dyn RawConnection>, handlers: Handlers) -> Self {
        Self {
            raw,
            handlers,
            broken: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The undecorated driver connection. Calls made on it skip the handlers.
    #[must_use]
    pub fn raw(&self) -> Arc<dyn RawConnection> {
        Arc::clone(&self.raw)
    }

    #[must_use]
    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    /// Flag the connection so the pool closes it instead of reusing it.
    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub(crate) fn broken_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.broken)
    }

    /// Proxies `QueryContext` through the query interceptors.
    ///
    /// # Errors
    /// Returns `TxxError::UnsupportedOperation` if the raw connection can't query
    /// with a context, or whatever the interceptors or the driver return.
    pub async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<Rows, TxxError> {
        let queryer = self
            .raw
            .queryer()
            .ok_or(TxxError::UnsupportedOperation("QueryContext"))?;
        ctx.check()?;
        self.handlers
            .query_chain(queryer)
            .query_context(ctx, query, args)
            .await
    }

    /// Proxies `PrepareContext` through the prepare interceptors.
    ///
    /// # Errors
    /// Returns `TxxError::UnsupportedOperation` if the raw connection can't prepare
    /// with a context, or whatever the interceptors or the driver return.
    pub async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError> {
        let preparer = self
            .raw
            .preparer()
            .ok_or(TxxError::UnsupportedOperation("PrepareContext"))?;
        ctx.check()?;
        self.handlers
            .prepare_chain(preparer)
            .prepare_context(ctx, query)
            .await
    }

    /// Proxies `BeginTx` through the begin interceptors.
    ///
    /// # Errors
    /// Returns `TxxError::UnsupportedOperation` if the raw connection can't begin
    /// with options, or whatever the interceptors or the driver return.
    pub async fn begin_tx(
        &self,
        ctx: &Context,
        opts: TxOptions,
    ) -> Result<Box<dyn Transaction>, TxxError> {
        let beginner = self
            .raw
            .tx_beginner()
            .ok_or(TxxError::UnsupportedOperation("BeginTx"))?;
        ctx.check()?;
        self.handlers
            .begin_tx_chain(beginner)
            .begin_tx(ctx, opts)
            .await
    }

    /// Proxies `ExecContext` through the exec interceptors.
    ///
    /// # Errors
    /// Returns `TxxError::UnsupportedOperation` if the raw connection can't exec
    /// with a context, or whatever the interceptors or the driver return.
    pub async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, TxxError> {
        let execer = self
            .raw
            .execer()
            .ok_or(TxxError::UnsupportedOperation("ExecContext"))?;
        ctx.check()?;
        self.handlers
            .exec_chain(execer)
            .exec_context(ctx, query, args)
            .await
    }

    /// # Errors
    /// Returns whatever the driver returns when closing.
    pub async fn close(&self) -> Result<(), TxxError> {
        self.raw.close().await
    }

    /// # Errors
    /// Returns whatever the driver returns.
    pub async fn prepare(&self, query: &str) -> Result<Box<dyn Statement>, TxxError> {
        self.raw.prepare(query).await
    }

    /// # Errors
    /// Returns whatever the driver returns.
    pub async fn begin(&self) -> Result<Box<dyn Transaction>, TxxError> {
        self.raw.begin().await
    }

    /// # Errors
    /// Returns `TxxError::UnsupportedOperation` if the raw connection can't ping.
    pub async fn ping(&self, ctx: &Context) -> Result<(), TxxError> {
        let pinger = self
            .raw
            .pinger()
            .ok_or(TxxError::UnsupportedOperation("Ping"))?;
        pinger.ping(ctx).await
    }

    /// # Errors
    /// Returns `TxxError::UnsupportedOperation` if the raw connection doesn't check
    /// values, or the checker's rejection.
    pub fn check_named_value(&self, value: &mut NamedValue) -> Result<(), TxxError> {
        let checker = self
            .raw
            .value_checker()
            .ok_or(TxxError::UnsupportedOperation("CheckNamedValue"))?;
        checker.check_named_value(value)
    }

    /// # Errors
    /// Returns `TxxError::UnsupportedOperation` if the raw connection can't reset
    /// its session, or the driver's failure.
    pub async fn reset_session(&self, ctx: &Context) -> Result<(), TxxError> {
        let resetter = self
            .raw
            .session_resetter()
            .ok_or(TxxError::UnsupportedOperation("ResetSession"))?;
        resetter.reset_session(ctx).await
    }
}

impl fmt::Debug for ProxyConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConnection")
            .field("handlers", &self.handlers)
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

// A proxy is itself a connection, so proxies can wrap proxies. Every
// capability is advertised; gating happens when the call reaches the raw one.
#[async_trait]
impl RawConnection for ProxyConnection {
    async fn prepare(&self, query: &str) -> Result<Box<dyn Statement>, TxxError> {
        ProxyConnection::prepare(self, query).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, TxxError> {
        ProxyConnection::begin(self).await
    }

    async fn close(&self) -> Result<(), TxxError> {
        ProxyConnection::close(self).await
    }

    fn queryer(&self) -> Option<&dyn QueryerContext> {
        Some(self)
    }

    fn execer(&self) -> Option<&dyn ExecerContext> {
        Some(self)
    }

    fn preparer(&self) -> Option<&dyn ConnPrepareContext> {
        Some(self)
    }

    fn tx_beginner(&self) -> Option<&dyn ConnBeginTx> {
        Some(self)
    }

    fn pinger(&self) -> Option<&dyn Pinger> {
        Some(self)
    }

    fn session_resetter(&self) -> Option<&dyn SessionResetter> {
        Some(self)
    }

    fn value_checker(&self) -> Option<&dyn NamedValueChecker> {
        Some(self)
    }
}

#[async_trait]
impl QueryerContext for ProxyConnection {
    async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<Rows, TxxError> {
        ProxyConnection::query_context(self, ctx, query, args).await
    }
}

#[async_trait]
impl ExecerContext for ProxyConnection {
    async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, TxxError> {
        ProxyConnection::exec_context(self, ctx, query, args).await
    }
}

#[async_trait]
impl ConnPrepareContext for ProxyConnection {
    async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError> {
        ProxyConnection::prepare_context(self, ctx, query).await
    }
}

#[async_trait]
impl ConnBeginTx for ProxyConnection {
    async fn begin_tx(
        &self,
        ctx: &Context,
        opts: TxOptions,
    ) -> Result<Box<dyn Transaction>, TxxError> {
        ProxyConnection::begin_tx(self, ctx, opts).await
    }
}

#[async_trait]
impl Pinger for ProxyConnection {
    async fn ping(&self, ctx: &Context) -> Result<(), TxxError> {
        ProxyConnection::ping(self, ctx).await
    }
}

#[async_trait]
impl SessionResetter for ProxyConnection {
    async fn reset_session(&self, ctx: &Context) -> Result<(), TxxError> {
        ProxyConnection::reset_session(self, ctx).await
    }
}

impl NamedValueChecker for ProxyConnection {
    fn check_named_value(&self, value: &mut NamedValue) -> Result<(), TxxError> {
        ProxyConnection::check_named_value(self, value)
    }
}
