use std::error::Error as StdError;

use thiserror::Error;

/// Boxed error used for driver-specific and caller-supplied failures.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum TxxError {
    /// The raw connection doesn't implement the requested capability.
    #[error("underlying driver doesn't support {0:?} operation")]
    UnsupportedOperation(&'static str),

    /// A transaction is already bound to the calling context.
    #[error("transaction is already started")]
    TransactionAlreadyStarted,

    #[error("transaction has already been committed or rolled back")]
    TransactionDone,

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("grab conn: {0}")]
    AcquireConnection(#[source] Box<TxxError>),

    #[error("begin tx: {0}")]
    BeginTransaction(#[source] Box<TxxError>),

    #[error("commit: {0}")]
    Commit(#[source] Box<TxxError>),

    #[error("open connector: {0}")]
    OpenConnector(#[source] Box<TxxError>),

    /// The unit of work failed; the caller's error is kept as-is.
    #[error(transparent)]
    UnitOfWork(BoxError),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Driver error: {0}")]
    Driver(#[source] BoxError),
}

impl TxxError {
    /// Find the first error of type `E` in the cause chain, starting at `self`.
    ///
    /// Unlike a plain `source()` walk this looks inside [`TxxError::UnitOfWork`],
    /// so the caller's original error stays reachable.
    #[must_use]
    pub fn find_cause<E: StdError + 'static>(&self) -> Option<&E> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = next_cause(err);
        }
        None
    }

    /// True when this error (or one of its causes) is [`TxxError::TransactionAlreadyStarted`].
    #[must_use]
    pub fn is_transaction_already_started(&self) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(TxxError::TransactionAlreadyStarted) = err.downcast_ref::<TxxError>() {
                return true;
            }
            current = next_cause(err);
        }
        false
    }
}

fn next_cause<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a (dyn StdError + 'static)> {
    if let Some(TxxError::UnitOfWork(inner)) = err.downcast_ref::<TxxError>() {
        let inner: &(dyn StdError + 'static) = inner.as_ref();
        return Some(inner);
    }
    err.source()
}

impl From<bb8::RunError<TxxError>> for TxxError {
    fn from(err: bb8::RunError<TxxError>) -> Self {
        match err {
            bb8::RunError::User(err) => err,
            bb8::RunError::TimedOut => {
                TxxError::Pool("timed out waiting for a connection".to_string())
            }
        }
    }
}
