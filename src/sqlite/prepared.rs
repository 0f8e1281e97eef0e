use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::context::Context;
use crate::driver::{ExecResult, NamedValue, Rows, Statement};
use crate::error::TxxError;

use super::connection::{SqliteHandle, exec_sql, query_sql};

/// Statement prepared on a `SQLite` connection.
///
/// Only the SQL is kept; execution goes through the connection's statement
/// cache. The pool layer decides how long the statement may use the connection.
pub struct SqliteStatement {
    handle: SqliteHandle,
    sql: Arc<str>,
    num_input: usize,
    closed: AtomicBool,
}

impl SqliteStatement {
    pub(crate) fn new(handle: SqliteHandle, sql: &str, num_input: usize) -> Self {
        Self {
            handle,
            sql: Arc::from(sql),
            num_input,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), TxxError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TxxError::ExecutionError("sqlite statement is closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Statement for SqliteStatement {
    fn num_input(&self) -> Option<usize> {
        Some(self.num_input)
    }

    async fn exec(&self, ctx: &Context, args: &[NamedValue]) -> Result<ExecResult, TxxError> {
        self.ensure_open()?;
        let sql = Arc::clone(&self.sql);
        let args = args.to_vec();
        self.handle
            .run(ctx, move |conn| exec_sql(conn, &sql, &args))
            .await
    }

    async fn query(&self, ctx: &Context, args: &[NamedValue]) -> Result<Rows, TxxError> {
        self.ensure_open()?;
        let sql = Arc::clone(&self.sql);
        let args = args.to_vec();
        self.handle
            .run(ctx, move |conn| query_sql(conn, &sql, &args))
            .await
    }

    async fn close(&self) -> Result<(), TxxError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
