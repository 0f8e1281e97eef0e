use async_trait::async_trait;

use crate::context::Context;
use crate::driver::Transaction;
use crate::error::TxxError;

use super::connection::SqliteHandle;

/// Transaction opened with `BEGIN` on a `SQLite` connection.
///
/// Read-only transactions switch `query_only` on for their duration.
pub struct SqliteTx {
    handle: SqliteHandle,
    read_only: bool,
}

impl SqliteTx {
    pub(crate) fn new(handle: SqliteHandle, read_only: bool) -> Self {
        Self { handle, read_only }
    }

    async fn finish(&self, statement: &'static str) -> Result<(), TxxError> {
        let sql = if self.read_only {
            format!("{statement}; PRAGMA query_only = OFF;")
        } else {
            statement.to_string()
        };
        self.handle
            .run(&Context::background(), move |conn| {
                conn.execute_batch(&sql).map_err(TxxError::Sqlite)
            })
            .await
    }
}

#[async_trait]
impl Transaction for SqliteTx {
    async fn commit(&mut self) -> Result<(), TxxError> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), TxxError> {
        self.finish("ROLLBACK").await
    }
}
