//! Call context carried through every data-access call.
//!
//! A [`Context`] is an immutable value: deriving a child (`with_value`,
//! `with_cancel`, `with_timeout`) never changes the parent, so sibling branches
//! cannot observe each other's values. Cancellation flows from parent to child
//! only. The ambient transaction bound by [`crate::TxManager`] lives under a key
//! type private to this module.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::driver::{ExecResult, NamedValue, RawConnection, Rows, Statement};
use crate::error::TxxError;

#[derive(Clone)]
pub struct Context {
    values: Option<Arc<ValueNode>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

struct ValueNode {
    value: Box<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueNode>>,
}

/// Cancels the context it was returned with, and every context derived from it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Context {
    /// Root context: no values, never cancelled, no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self {
            values: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a child carrying `value`, keyed by its type.
    ///
    /// A value of the same type set further up the lineage is shadowed, not replaced.
    #[must_use]
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        Self {
            values: Some(Arc::new(ValueNode {
                value: Box::new(value),
                parent: self.values.clone(),
            })),
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        }
    }

    /// Nearest value of type `T` in this lineage.
    #[must_use]
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        let mut node = self.values.as_deref();
        while let Some(current) = node {
            if let Some(value) = current.value.downcast_ref::<T>() {
                return Some(value);
            }
            node = current.parent.as_deref();
        }
        None
    }

    /// Derive a child that can be cancelled independently of its parent.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let token = self.cancel.child_token();
        let handle = CancelHandle {
            token: token.clone(),
        };
        let ctx = Self {
            values: self.values.clone(),
            cancel: token,
            deadline: self.deadline,
        };
        (ctx, handle)
    }

    /// Derive a cancellable child whose deadline is at most `deadline`.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        let (mut ctx, handle) = self.with_cancel();
        ctx.deadline = Some(match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        });
        (ctx, handle)
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<TxxError> {
        if self.cancel.is_cancelled() {
            return Some(TxxError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(TxxError::DeadlineExceeded),
            _ => None,
        }
    }

    /// `Ok(())` while the context is live, its [`Context::err`] otherwise.
    ///
    /// # Errors
    /// Returns `TxxError::Canceled` or `TxxError::DeadlineExceeded`.
    pub fn check(&self) -> Result<(), TxxError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// True when a transaction is bound to this lineage.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.ambient().is_some()
    }

    pub(crate) fn with_ambient(&self, tx: AmbientTx) -> Self {
        self.with_value(AmbientKey(tx))
    }

    pub(crate) fn ambient(&self) -> Option<&AmbientTx> {
        self.value::<AmbientKey>().map(|key| &key.0)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}

struct AmbientKey(AmbientTx);

/// Transaction bound to a context lineage.
///
/// Holds the raw connection the transaction was opened on, so redirected calls
/// skip the interceptors of the wrapper that owns it.
#[derive(Clone)]
pub(crate) struct AmbientTx {
    conn: Arc<dyn RawConnection>,
    finished: Arc<AtomicBool>,
}

impl AmbientTx {
    pub(crate) fn new(conn: Arc<dyn RawConnection>) -> Self {
        Self {
            conn,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Calls through contexts that outlive the transaction fail from now on.
    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Finishes the transaction when dropped, so it also ends if the unit of
    /// work is abandoned mid-flight.
    pub(crate) fn finish_on_drop(&self) -> FinishGuard {
        FinishGuard(self.clone())
    }

    /// The transaction's connection, whether or not the transaction is still open.
    pub(crate) fn conn(&self) -> Arc<dyn RawConnection> {
        Arc::clone(&self.conn)
    }

    fn live_conn(&self) -> Result<&dyn RawConnection, TxxError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(TxxError::TransactionDone);
        }
        Ok(self.conn.as_ref())
    }

    pub(crate) async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<Rows, TxxError> {
        let queryer = self
            .live_conn()?
            .queryer()
            .ok_or(TxxError::UnsupportedOperation("QueryContext"))?;
        queryer.query_context(ctx, query, args).await
    }

    pub(crate) async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, TxxError> {
        let execer = self
            .live_conn()?
            .execer()
            .ok_or(TxxError::UnsupportedOperation("ExecContext"))?;
        execer.exec_context(ctx, query, args).await
    }

    pub(crate) async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError> {
        let preparer = self
            .live_conn()?
            .preparer()
            .ok_or(TxxError::UnsupportedOperation("PrepareContext"))?;
        let inner = preparer.prepare_context(ctx, query).await?;
        Ok(Box::new(TxStatement {
            inner,
            finished: Arc::clone(&self.finished),
        }))
    }
}

pub(crate) struct FinishGuard(AmbientTx);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Statement prepared inside an ambient transaction. Once the transaction
/// finishes its connection may belong to another lineage, so it stops running.
struct TxStatement {
    inner: Box<dyn Statement>,
    finished: Arc<AtomicBool>,
}

impl TxStatement {
    fn ensure_live(&self) -> Result<(), TxxError> {
        if self.finished.load(Ordering::Acquire) {
            Err(TxxError::TransactionDone)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Statement for TxStatement {
    fn num_input(&self) -> Option<usize> {
        self.inner.num_input()
    }

    async fn exec(&self, ctx: &Context, args: &[NamedValue]) -> Result<ExecResult, TxxError> {
        self.ensure_live()?;
        self.inner.exec(ctx, args).await
    }

    async fn query(&self, ctx: &Context, args: &[NamedValue]) -> Result<Rows, TxxError> {
        self.ensure_live()?;
        self.inner.query(ctx, args).await
    }

    async fn close(&self) -> Result<(), TxxError> {
        self.inner.close().await
    }
}
