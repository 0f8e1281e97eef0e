// SQLite driver backed by rusqlite
//
// - config: the driver and its connection options
// - connection: connection, blocking execution and capabilities
// - params: argument binding and row extraction
// - prepared: prepared statements
// - transaction: BEGIN/COMMIT/ROLLBACK

pub mod config;
pub mod connection;
mod params;
pub mod prepared;
pub mod transaction;

pub use config::SqliteDriver;
pub use connection::SqliteConnection;
pub use prepared::SqliteStatement;
pub use transaction::SqliteTx;
