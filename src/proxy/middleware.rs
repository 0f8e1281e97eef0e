use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::driver::{
    ConnBeginTx, ConnPrepareContext, ExecResult, ExecerContext, NamedValue, QueryerContext, Rows,
    Statement, Transaction, TxOptions,
};
use crate::error::TxxError;

/// Runs around `QueryContext` calls. Call `next` to continue down the chain.
#[async_trait]
pub trait QueryInterceptor: Send + Sync {
    async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
        next: &dyn QueryerContext,
    ) -> Result<Rows, TxxError>;
}

/// Runs around `ExecContext` calls. Call `next` to continue down the chain.
#[async_trait]
pub trait ExecInterceptor: Send + Sync {
    async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
        next: &dyn ExecerContext,
    ) -> Result<ExecResult, TxxError>;
}

/// Runs around `PrepareContext` calls. Call `next` to continue down the chain.
#[async_trait]
pub trait PrepareInterceptor: Send + Sync {
    async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
        next: &dyn ConnPrepareContext,
    ) -> Result<Box<dyn Statement>, TxxError>;
}

/// Runs around `BeginTx` calls. Call `next` to continue down the chain.
#[async_trait]
pub trait BeginTxInterceptor: Send + Sync {
    async fn begin_tx(
        &self,
        ctx: &Context,
        opts: TxOptions,
        next: &dyn ConnBeginTx,
    ) -> Result<Box<dyn Transaction>, TxxError>;
}

/// The interceptors installed on a connection, one ordered chain per operation.
///
/// An empty chain passes calls straight to the raw connection. Within a chain
/// the first interceptor registered is the outermost one: it runs first and
/// reaches the raw connection through every interceptor registered after it.
#[derive(Clone, Default)]
pub struct Handlers {
    query: Vec<Arc<dyn QueryInterceptor>>,
    exec: Vec<Arc<dyn ExecInterceptor>>,
    prepare: Vec<Arc<dyn PrepareInterceptor>>,
    begin_tx: Vec<Arc<dyn BeginTxInterceptor>>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query(mut self, interceptor: impl QueryInterceptor + 'static) -> Self {
        self.query.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn exec(mut self, interceptor: impl ExecInterceptor + 'static) -> Self {
        self.exec.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn prepare(mut self, interceptor: impl PrepareInterceptor + 'static) -> Self {
        self.prepare.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn begin_tx(mut self, interceptor: impl BeginTxInterceptor + 'static) -> Self {
        self.begin_tx.push(Arc::new(interceptor));
        self
    }

    /// Nest `inner` inside this set: its interceptors run after ours.
    #[must_use]
    pub fn merge(mut self, inner: Handlers) -> Self {
        self.query.extend(inner.query);
        self.exec.extend(inner.exec);
        self.prepare.extend(inner.prepare);
        self.begin_tx.extend(inner.begin_tx);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
            && self.exec.is_empty()
            && self.prepare.is_empty()
            && self.begin_tx.is_empty()
    }

    pub(crate) fn query_chain<'a>(&'a self, raw: &'a dyn QueryerContext) -> QueryChain<'a> {
        QueryChain {
            interceptors: &self.query,
            raw,
        }
    }

    pub(crate) fn exec_chain<'a>(&'a self, raw: &'a dyn ExecerContext) -> ExecChain<'a> {
        ExecChain {
            interceptors: &self.exec,
            raw,
        }
    }

    pub(crate) fn prepare_chain<'a>(&'a self, raw: &'a dyn ConnPrepareContext) -> PrepareChain<'a> {
        PrepareChain {
            interceptors: &self.prepare,
            raw,
        }
    }

    pub(crate) fn begin_tx_chain<'a>(&'a self, raw: &'a dyn ConnBeginTx) -> BeginTxChain<'a> {
        BeginTxChain {
            interceptors: &self.begin_tx,
            raw,
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("query", &self.query.len())
            .field("exec", &self.exec.len())
            .field("prepare", &self.prepare.len())
            .field("begin_tx", &self.begin_tx.len())
            .finish()
    }
}

pub(crate) struct QueryChain<'a> {
    interceptors: &'a [Arc<dyn QueryInterceptor>],
    raw: &'a dyn QueryerContext,
}

#[async_trait]
impl QueryerContext for QueryChain<'_> {
    async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<Rows, TxxError> {
        match self.interceptors.split_first() {
            Some((outer, rest)) => {
                let next = QueryChain {
                    interceptors: rest,
                    raw: self.raw,
                };
                outer.query_context(ctx, query, args, &next).await
            }
            None => self.raw.query_context(ctx, query, args).await,
        }
    }
}

pub(crate) struct ExecChain<'a> {
    interceptors: &'a [Arc<dyn ExecInterceptor>],
    raw: &'a dyn ExecerContext,
}

#[async_trait]
impl ExecerContext for ExecChain<'_> {
    async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, TxxError> {
        match self.interceptors.split_first() {
            Some((outer, rest)) => {
                let next = ExecChain {
                    interceptors: rest,
                    raw: self.raw,
                };
                outer.exec_context(ctx, query, args, &next).await
            }
            None => self.raw.exec_context(ctx, query, args).await,
        }
    }
}

pub(crate) struct PrepareChain<'a> {
    interceptors: &'a [Arc<dyn PrepareInterceptor>],
    raw: &'a dyn ConnPrepareContext,
}

#[async_trait]
impl ConnPrepareContext for PrepareChain<'_> {
    async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError> {
        match self.interceptors.split_first() {
            Some((outer, rest)) => {
                let next = PrepareChain {
                    interceptors: rest,
                    raw: self.raw,
                };
                outer.prepare_context(ctx, query, &next).await
            }
            None => self.raw.prepare_context(ctx, query).await,
        }
    }
}

pub(crate) struct BeginTxChain<'a> {
    interceptors: &'a [Arc<dyn BeginTxInterceptor>],
    raw: &'a dyn ConnBeginTx,
}

#[async_trait]
impl ConnBeginTx for BeginTxChain<'_> {
    async fn begin_tx(
        &self,
        ctx: &Context,
        opts: TxOptions,
    ) -> Result<Box<dyn Transaction>, TxxError> {
        match self.interceptors.split_first() {
            Some((outer, rest)) => {
                let next = BeginTxChain {
                    interceptors: rest,
                    raw: self.raw,
                };
                outer.begin_tx(ctx, opts, &next).await
            }
            None => self.raw.begin_tx(ctx, opts).await,
        }
    }
}
