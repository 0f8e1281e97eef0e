mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{Event, MockDriver};
use sql_txx::driver::{Connector, Driver, ExecerContext, RawConnection};
use sql_txx::proxy::ExecInterceptor;
use sql_txx::{Context, Database, ExecResult, Handlers, NamedValue, ProxyConnector, TxxError};

#[derive(Clone, Default)]
struct CountExec(Arc<AtomicUsize>);

#[async_trait]
impl ExecInterceptor for CountExec {
    async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
        next: &dyn ExecerContext,
    ) -> Result<ExecResult, TxxError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        next.exec_context(ctx, query, args).await
    }
}

#[tokio::test]
async fn plain_open_path_is_wrapped() {
    let driver = MockDriver::new();
    let count = CountExec::default();
    let connector = ProxyConnector::new(driver.clone(), "mock", Handlers::new().exec(count.clone()));
    assert!(connector.driver().context_opener().is_none());

    let conn = connector.connect_proxy(&Context::background()).await.unwrap();
    conn.exec_context(&Context::background(), "UPDATE t", &[])
        .await
        .unwrap();
    assert_eq!(count.0.load(Ordering::SeqCst), 1);
    assert_eq!(driver.count(|e| matches!(e, Event::Open(_))), 1);
}

#[tokio::test]
async fn context_connector_path_is_wrapped() {
    let driver = MockDriver::with_context_opener();
    let count = CountExec::default();
    let connector = ProxyConnector::new(driver.clone(), "mock", Handlers::new().exec(count.clone()));
    assert!(connector.driver().context_opener().is_some());

    // Through the generic connector interface as well.
    let raw = Connector::connect(&connector, &Context::background())
        .await
        .unwrap();
    raw.execer()
        .unwrap()
        .exec_context(&Context::background(), "UPDATE t", &[])
        .await
        .unwrap();
    assert_eq!(count.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connector_build_failure_is_labeled() {
    let driver = MockDriver::with_context_opener();
    let connector = ProxyConnector::new(driver.clone(), "bad-dsn", Handlers::new());

    let err = connector
        .connect_proxy(&Context::background())
        .await
        .unwrap_err();
    assert!(matches!(err, TxxError::OpenConnector(_)), "{err:?}");
    assert!(err.to_string().starts_with("open connector: "));
    assert_eq!(driver.count(|e| matches!(e, Event::Open(_))), 0);
}

#[tokio::test]
async fn canceled_context_opens_nothing() {
    let driver = MockDriver::new();
    let connector = ProxyConnector::new(driver.clone(), "mock", Handlers::new());
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();

    let err = connector.connect_proxy(&ctx).await.unwrap_err();
    assert!(matches!(err, TxxError::Canceled));
    assert!(driver.events().is_empty());
}

#[tokio::test]
async fn pool_connections_come_from_the_connector() {
    let driver = MockDriver::with_context_opener();
    let count = CountExec::default();
    let connector = ProxyConnector::new(driver.clone(), "mock", Handlers::new().exec(count.clone()));
    let db = Database::builder().max_size(1).build(connector).await.unwrap();

    let bg = Context::background();
    db.exec_context(&bg, "UPDATE a", &[]).await.unwrap();
    db.exec_context(&bg, "UPDATE b", &[]).await.unwrap();
    assert_eq!(count.0.load(Ordering::SeqCst), 2);
    // One pooled connection, reused.
    assert_eq!(driver.count(|e| matches!(e, Event::Open(_))), 1);
    assert_eq!(driver.conns_running("UPDATE a"), driver.conns_running("UPDATE b"));
}

#[tokio::test]
async fn unreachable_database_surfaces_on_checkout() {
    let driver = MockDriver::new();
    let connector = ProxyConnector::new(driver, "unreachable", Handlers::new());
    let db = Database::builder()
        .connection_timeout(std::time::Duration::from_millis(200))
        .build(connector)
        .await
        .unwrap();

    let err = db.conn(&Context::background()).await.unwrap_err();
    assert!(
        matches!(err, TxxError::ConnectionError(_) | TxxError::Pool(_)),
        "{err:?}"
    );
}
