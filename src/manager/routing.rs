use async_trait::async_trait;

use crate::context::Context;
use crate::driver::{
    ConnBeginTx, ConnPrepareContext, ExecResult, ExecerContext, NamedValue, QueryerContext, Rows,
    Statement, Transaction, TxOptions,
};
use crate::error::TxxError;
use crate::proxy::{BeginTxInterceptor, ExecInterceptor, PrepareInterceptor, QueryInterceptor};

/// Sends calls made under an ambient transaction to that transaction's
/// connection, and refuses to begin a second one on the same lineage.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AmbientRouter;

#[async_trait]
impl BeginTxInterceptor for AmbientRouter {
    async fn begin_tx(
        &self,
        ctx: &Context,
        opts: TxOptions,
        next: &dyn ConnBeginTx,
    ) -> Result<Box<dyn Transaction>, TxxError> {
        if ctx.ambient().is_some() {
            return Err(TxxError::TransactionAlreadyStarted);
        }
        next.begin_tx(ctx, opts).await
    }
}

#[async_trait]
impl QueryInterceptor for AmbientRouter {
    async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
        next: &dyn QueryerContext,
    ) -> Result<Rows, TxxError> {
        match ctx.ambient() {
            Some(tx) => tx.query_context(ctx, query, args).await,
            None => next.query_context(ctx, query, args).await,
        }
    }
}

#[async_trait]
impl ExecInterceptor for AmbientRouter {
    async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
        next: &dyn ExecerContext,
    ) -> Result<ExecResult, TxxError> {
        match ctx.ambient() {
            Some(tx) => tx.exec_context(ctx, query, args).await,
            None => next.exec_context(ctx, query, args).await,
        }
    }
}

#[async_trait]
impl PrepareInterceptor for AmbientRouter {
    async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
        next: &dyn ConnPrepareContext,
    ) -> Result<Box<dyn Statement>, TxxError> {
        match ctx.ambient() {
            Some(tx) => tx.prepare_context(ctx, query).await,
            None => next.prepare_context(ctx, query).await,
        }
    }
}
