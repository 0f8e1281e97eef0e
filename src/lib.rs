//! Ambient transactions for SQL drivers.
//!
//! Driver connections are wrapped in a [`proxy::ProxyConnection`] that runs
//! every context-aware call through a chain of interceptors. [`TxManager`]
//! installs interceptors that look for a transaction bound to the call's
//! [`Context`]: inside [`TxManager::run_in_transaction`] every query, exec and
//! prepare made through [`TxManager::db`] with the unit of work's context joins
//! the same transaction, without handing a transaction object around.
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! # async fn demo() -> Result<(), sql_txx::TxxError> {
//! use sql_txx::sqlite::SqliteDriver;
//! use sql_txx::{Context, TxManager, TxOptions, TxxError};
//!
//! let txm = TxManager::new(SqliteDriver::new(), "file:app.db").await?;
//! let db = txm.db().clone();
//! txm.run_in_transaction(&Context::background(), TxOptions::default(), |ctx| async move {
//!     db.exec_context(&ctx, "INSERT INTO t(x) VALUES (?1)", &[1.into()]).await?;
//!     db.exec_context(&ctx, "INSERT INTO t(x) VALUES (?1)", &[2.into()]).await?;
//!     Ok::<_, TxxError>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod driver;
pub mod error;
pub mod logger;
pub mod manager;
pub mod pool;
pub mod proxy;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use context::{CancelHandle, Context};
pub use driver::{ExecResult, IsolationLevel, NamedValue, Rows, TxOptions, Value};
pub use error::{BoxError, TxxError};
pub use logger::{NopLogger, TracingLogger, TxLogger};
pub use manager::{TxManager, TxManagerBuilder};
pub use pool::{Conn, Database, PoolOptions, Tx};
pub use proxy::{Handlers, ProxyConnection, ProxyConnector};
