//! Interfaces a database driver plugs into.
//!
//! A driver hands out [`RawConnection`]s. Besides the mandatory plain
//! operations, a connection advertises optional capabilities through the
//! accessor methods on [`RawConnection`]; each defaults to `None`, so a driver
//! only overrides what it really supports.

mod options;
mod value;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::TxxError;

pub use options::{IsolationLevel, TxOptions};
pub use value::{ExecResult, NamedValue, Rows, Value};

/// Entry point of a database driver.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Open a new connection for `dsn`.
    async fn open(&self, dsn: &str) -> Result<Box<dyn RawConnection>, TxxError>;

    /// The context-aware opener, for drivers that have one.
    fn context_opener(&self) -> Option<&dyn DriverContext> {
        None
    }
}

/// Drivers able to parse a DSN once and connect many times with a context.
pub trait DriverContext: Send + Sync {
    fn open_connector(&self, dsn: &str) -> Result<Box<dyn Connector>, TxxError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, ctx: &Context) -> Result<Box<dyn RawConnection>, TxxError>;
}

/// A connection as handed out by a driver.
#[async_trait]
pub trait RawConnection: Send + Sync {
    async fn prepare(&self, query: &str) -> Result<Box<dyn Statement>, TxxError>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, TxxError>;

    async fn close(&self) -> Result<(), TxxError>;

    fn queryer(&self) -> Option<&dyn QueryerContext> {
        None
    }

    fn execer(&self) -> Option<&dyn ExecerContext> {
        None
    }

    fn preparer(&self) -> Option<&dyn ConnPrepareContext> {
        None
    }

    fn tx_beginner(&self) -> Option<&dyn ConnBeginTx> {
        None
    }

    fn pinger(&self) -> Option<&dyn Pinger> {
        None
    }

    fn session_resetter(&self) -> Option<&dyn SessionResetter> {
        None
    }

    fn value_checker(&self) -> Option<&dyn NamedValueChecker> {
        None
    }
}

#[async_trait]
pub trait QueryerContext: Send + Sync {
    async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<Rows, TxxError>;
}

#[async_trait]
pub trait ExecerContext: Send + Sync {
    async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, TxxError>;
}

#[async_trait]
pub trait ConnPrepareContext: Send + Sync {
    async fn prepare_context(
        &self,
        ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError>;
}

#[async_trait]
pub trait ConnBeginTx: Send + Sync {
    async fn begin_tx(
        &self,
        ctx: &Context,
        opts: TxOptions,
    ) -> Result<Box<dyn Transaction>, TxxError>;
}

#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, ctx: &Context) -> Result<(), TxxError>;
}

/// Called before a pooled connection is reused.
#[async_trait]
pub trait SessionResetter: Send + Sync {
    async fn reset_session(&self, ctx: &Context) -> Result<(), TxxError>;
}

/// Validates (and may convert in place) an argument before it reaches the driver.
pub trait NamedValueChecker: Send + Sync {
    fn check_named_value(&self, value: &mut NamedValue) -> Result<(), TxxError>;
}

/// A prepared statement.
#[async_trait]
pub trait Statement: Send + Sync {
    /// Number of placeholders, when the driver knows it.
    fn num_input(&self) -> Option<usize>;

    async fn exec(&self, ctx: &Context, args: &[NamedValue]) -> Result<ExecResult, TxxError>;

    async fn query(&self, ctx: &Context, args: &[NamedValue]) -> Result<Rows, TxxError>;

    async fn close(&self) -> Result<(), TxxError>;
}

/// An open transaction. Statements run on the connection that began it.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(&mut self) -> Result<(), TxxError>;

    async fn rollback(&mut self) -> Result<(), TxxError>;
}
