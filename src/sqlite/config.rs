use std::time::Duration;

use async_trait::async_trait;

use crate::driver::{Driver, RawConnection};
use crate::error::TxxError;

use super::connection::SqliteConnection;

/// Driver opening `rusqlite` connections. The DSN is a path or a `file:` URI.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    pub(crate) busy_timeout: Option<Duration>,
    pub(crate) wal: bool,
}

impl SqliteDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a connection waits on a locked database before failing.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Switch each new connection to `journal_mode = WAL`.
    #[must_use]
    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn open(&self, dsn: &str) -> Result<Box<dyn RawConnection>, TxxError> {
        let conn = SqliteConnection::open(dsn, self).await?;
        Ok(Box::new(conn))
    }
}
