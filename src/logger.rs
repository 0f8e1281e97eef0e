use tracing::warn;

use crate::error::TxxError;

/// Receives failures that happen while cleaning up and therefore can't be
/// returned to the caller.
pub trait TxLogger: Send + Sync {
    /// Releasing (or closing) the transaction's connection failed.
    fn close_conn(&self, err: &TxxError);

    /// Rolling back failed after the unit of work or the commit already had.
    fn rollback(&self, err: &TxxError);
}

/// Drops everything. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopLogger;

impl TxLogger for NopLogger {
    fn close_conn(&self, _err: &TxxError) {}

    fn rollback(&self, _err: &TxxError) {}
}

/// Reports through `tracing` at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TxLogger for TracingLogger {
    fn close_conn(&self, err: &TxxError) {
        warn!(error = %err, "failed to release transaction connection");
    }

    fn rollback(&self, err: &TxxError) {
        warn!(error = %err, "failed to roll back transaction");
    }
}
