// Interception layer between callers and driver connections.
//
// - conn: the capability-gated connection wrapper
// - connector: opens driver connections and wraps them (also the bb8 manager)
// - middleware: interceptor traits and the per-operation chains

pub mod conn;
pub mod connector;
pub mod middleware;

pub use conn::ProxyConnection;
pub use connector::ProxyConnector;
pub use middleware::{
    BeginTxInterceptor, ExecInterceptor, Handlers, PrepareInterceptor, QueryInterceptor,
};
