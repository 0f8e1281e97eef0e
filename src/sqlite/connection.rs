use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rusqlite::InterruptHandle;
use tokio::sync::Mutex;

use crate::context::Context;
use crate::driver::{
    ConnBeginTx, ConnPrepareContext, ExecResult, ExecerContext, IsolationLevel, NamedValue,
    NamedValueChecker, Pinger, QueryerContext, RawConnection, Rows, SessionResetter, Statement,
    Transaction, TxOptions,
};
use crate::error::TxxError;

use super::config::SqliteDriver;
use super::params::{bind_args, read_rows};
use super::prepared::SqliteStatement;
use super::transaction::SqliteTx;

pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

pub(crate) async fn run_blocking<F, R>(
    conn: SharedSqliteConnection,
    func: F,
) -> Result<R, TxxError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, TxxError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| TxxError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

/// Everything a connection, its statements and its transactions share.
#[derive(Clone)]
pub(crate) struct SqliteHandle {
    conn: SharedSqliteConnection,
    interrupt: Arc<InterruptHandle>,
    closed: Arc<AtomicBool>,
}

impl SqliteHandle {
    fn ensure_open(&self) -> Result<(), TxxError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TxxError::ConnectionError("sqlite connection is closed".into()))
        } else {
            Ok(())
        }
    }

    /// Run `func` on the blocking pool. If `ctx` ends first the running
    /// statement is interrupted and the context's error returned.
    pub(crate) async fn run<F, R>(&self, ctx: &Context, func: F) -> Result<R, TxxError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, TxxError> + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_open()?;
        ctx.check()?;
        let task = run_blocking(Arc::clone(&self.conn), func);
        tokio::pin!(task);
        tokio::select! {
            res = &mut task => res,
            () = ctx.done() => {
                self.interrupt.interrupt();
                match task.await {
                    Ok(value) => Ok(value),
                    Err(_interrupted) => Err(ctx.err().unwrap_or(TxxError::Canceled)),
                }
            }
        }
    }
}

pub(crate) fn query_sql(
    conn: &rusqlite::Connection,
    sql: &str,
    args: &[NamedValue],
) -> Result<Rows, TxxError> {
    let mut stmt = conn.prepare_cached(sql)?;
    bind_args(&mut stmt, args)?;
    read_rows(&mut stmt)
}

pub(crate) fn exec_sql(
    conn: &rusqlite::Connection,
    sql: &str,
    args: &[NamedValue],
) -> Result<ExecResult, TxxError> {
    let changed = {
        let mut stmt = conn.prepare_cached(sql)?;
        bind_args(&mut stmt, args)?;
        stmt.raw_execute()?
    };
    Ok(ExecResult {
        rows_affected: u64::try_from(changed).unwrap_or(u64::MAX),
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

/// A `rusqlite` connection exposing every optional capability.
pub struct SqliteConnection {
    handle: SqliteHandle,
}

impl SqliteConnection {
    pub(crate) async fn open(dsn: &str, driver: &SqliteDriver) -> Result<Self, TxxError> {
        let dsn = dsn.to_owned();
        let busy_timeout = driver.busy_timeout;
        let wal = driver.wal;
        let conn = tokio::task::spawn_blocking(move || -> Result<rusqlite::Connection, TxxError> {
            let conn = rusqlite::Connection::open(&dsn)?;
            if let Some(timeout) = busy_timeout {
                conn.busy_timeout(timeout)?;
            }
            if wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            Ok(conn)
        })
        .await
        .map_err(|e| TxxError::ConnectionError(format!("sqlite open join error: {e}")))??;

        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            handle: SqliteHandle {
                conn: Arc::new(Mutex::new(conn)),
                interrupt,
                closed: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    async fn prepare_with(&self, ctx: &Context, query: &str) -> Result<Box<dyn Statement>, TxxError> {
        let sql = query.to_owned();
        let num_input = self
            .handle
            .run(ctx, move |conn| Ok(conn.prepare_cached(&sql)?.parameter_count()))
            .await?;
        Ok(Box::new(SqliteStatement::new(
            self.handle.clone(),
            query,
            num_input,
        )))
    }

    async fn begin_with(
        &self,
        ctx: &Context,
        opts: TxOptions,
    ) -> Result<Box<dyn Transaction>, TxxError> {
        match opts.isolation {
            IsolationLevel::Default | IsolationLevel::Serializable => {}
            other => {
                return Err(TxxError::ExecutionError(format!(
                    "sqlite: isolation level {other} is not supported"
                )));
            }
        }
        let read_only = opts.read_only;
        self.handle
            .run(ctx, move |conn| {
                let sql = if read_only {
                    "BEGIN; PRAGMA query_only = ON;"
                } else {
                    "BEGIN"
                };
                conn.execute_batch(sql).map_err(TxxError::Sqlite)
            })
            .await?;
        Ok(Box::new(SqliteTx::new(self.handle.clone(), read_only)))
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("closed", &self.handle.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RawConnection for SqliteConnection {
    async fn prepare(&self, query: &str) -> Result<Box<dyn Statement>, TxxError> {
        self.prepare_with(&Context::background(), query).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, TxxError> {
        self.begin_with(&Context::background(), TxOptions::default())
            .await
    }

    async fn close(&self) -> Result<(), TxxError> {
        if self.handle.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        run_blocking(Arc::clone(&self.handle.conn), |conn| {
            conn.flush_prepared_statement_cache();
            Ok(())
        })
        .await
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
impl QueryerContext for SqliteConnection {
    async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<Rows, TxxError> {
        let sql = query.to_owned();
        let args = args.to_vec();
        self.handle
            .run(ctx, move |conn| query_sql(conn, &sql, &args))
            .await
    }
}

#[async_trait]
impl ExecerContext for SqliteConnection {
    async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, TxxError> {
        let sql = query.to_owned();
        let args = args.to_vec();
        self.handle
            .run(ctx, move |conn| exec_sql(conn, &sql, &args))
            .await
    }
}

#[async_trait]
impl ConnPrepareContext for SqliteConnection {
    async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError> {
        self.prepare_with(ctx, query).await
    }
}

#[async_trait]
impl ConnBeginTx for SqliteConnection {
    async fn begin_tx(
        &self,
        ctx: &Context,
        opts: TxOptions,
    ) -> Result<Box<dyn Transaction>, TxxError> {
        self.begin_with(ctx, opts).await
    }
}

#[async_trait]
impl Pinger for SqliteConnection {
    async fn ping(&self, ctx: &Context) -> Result<(), TxxError> {
        self.handle
            .run(ctx, |conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))
                    .map_err(TxxError::Sqlite)
            })
            .await
    }
}

#[async_trait]
impl SessionResetter for SqliteConnection {
    // A connection handed back with a transaction still open must not be reused.
    async fn reset_session(&self, ctx: &Context) -> Result<(), TxxError> {
        self.handle
            .run(ctx, |conn| {
                if conn.is_autocommit() {
                    Ok(())
                } else {
                    Err(TxxError::ConnectionError(
                        "sqlite connection returned with an open transaction".into(),
                    ))
                }
            })
            .await
    }
}

impl NamedValueChecker for SqliteConnection {
    fn check_named_value(&self, value: &mut NamedValue) -> Result<(), TxxError> {
        match &value.name {
            Some(name) if name.is_empty() => Err(TxxError::ExecutionError(
                "sqlite: empty parameter name".into(),
            )),
            _ => Ok(()),
        }
    }
}
