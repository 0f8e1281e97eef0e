#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use sql_txx::driver::{ExecerContext, QueryerContext};
use sql_txx::proxy::{ExecInterceptor, QueryInterceptor};
use sql_txx::sqlite::SqliteDriver;
use sql_txx::{
    Context, Database, ExecResult, Handlers, NamedValue, ProxyConnector, Rows, TxxError, Value,
};

#[derive(Debug, Clone, PartialEq)]
struct Tag(&'static str);

#[derive(Clone, Default)]
struct CountExec {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ExecInterceptor for CountExec {
    async fn exec_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
        next: &dyn ExecerContext,
    ) -> Result<ExecResult, TxxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        next.exec_context(ctx, query, args).await
    }
}

#[derive(Clone, Default)]
struct SeeTag {
    saw_tag: Arc<AtomicBool>,
}

#[async_trait]
impl QueryInterceptor for SeeTag {
    async fn query_context(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
        next: &dyn QueryerContext,
    ) -> Result<Rows, TxxError> {
        if ctx.value::<Tag>() == Some(&Tag("test")) {
            self.saw_tag.store(true, Ordering::SeqCst);
        }
        next.query_context(ctx, query, args).await
    }
}

#[tokio::test]
async fn interceptors_see_every_call_through_the_pool() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dsn = dir.path().join("proxy.db").to_string_lossy().into_owned();

    let exec = CountExec::default();
    let query = SeeTag::default();
    let handlers = Handlers::new().exec(exec.clone()).query(query.clone());
    let db = Database::builder()
        .max_size(2)
        .build(ProxyConnector::new(SqliteDriver::new(), dsn, handlers))
        .await?;

    let bg = Context::background();
    db.exec_context(&bg, "CREATE TABLE test (x INTEGER PRIMARY KEY, y TEXT)", &[])
        .await?;
    assert_eq!(exec.calls.load(Ordering::SeqCst), 1);

    db.exec_context(&bg, "INSERT INTO test(x, y) VALUES(1, 'blah'), (2, NULL)", &[])
        .await?;
    assert_eq!(exec.calls.load(Ordering::SeqCst), 2);

    let tagged = bg.with_value(Tag("test"));
    let rows = db
        .query_context(&tagged, "SELECT x, y FROM test ORDER BY x", &[])
        .await?;
    assert!(query.saw_tag.load(Ordering::SeqCst));

    assert_eq!(rows.len(), 2);
    assert_eq!(rows.get(0, "x"), Some(&Value::Integer(1)));
    assert_eq!(rows.get(0, "y"), Some(&Value::Text("blah".into())));
    assert_eq!(rows.get(1, "x"), Some(&Value::Integer(2)));
    assert_eq!(rows.get(1, "y"), Some(&Value::Null));
    Ok(())
}

#[tokio::test]
async fn positional_and_named_arguments_bind() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dsn = dir.path().join("args.db").to_string_lossy().into_owned();
    let db = Database::builder()
        .build(ProxyConnector::new(SqliteDriver::new(), dsn, Handlers::new()))
        .await?;
    let bg = Context::background();

    db.exec_context(&bg, "CREATE TABLE kv (k TEXT PRIMARY KEY, v BLOB)", &[])
        .await?;
    let res = db
        .exec_context(
            &bg,
            "INSERT INTO kv(k, v) VALUES (?1, ?2)",
            &["a".into(), vec![1u8, 2, 3].into()],
        )
        .await?;
    assert_eq!(res.rows_affected, 1);

    let conn = db.conn(&bg).await?;
    let rows = conn
        .query_context(
            &bg,
            "SELECT v FROM kv WHERE k = :key",
            &[NamedValue::named("key", 1, "a".into())],
        )
        .await?;
    assert_eq!(rows.get(0, "v"), Some(&Value::Blob(vec![1, 2, 3])));

    let err = db
        .exec_context(&bg, "INSERT INTO kv(k, v) VALUES (?1, ?2)", &["b".into()])
        .await
        .unwrap_err();
    assert!(!matches!(err, TxxError::UnsupportedOperation(_)), "{err}");
    Ok(())
}

#[tokio::test]
async fn prepared_statements_run_through_the_connection() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dsn = dir.path().join("prepared.db").to_string_lossy().into_owned();
    let db = Database::builder()
        .build(ProxyConnector::new(SqliteDriver::new(), dsn, Handlers::new()))
        .await?;
    let bg = Context::background();

    db.exec_context(&bg, "CREATE TABLE n (v INTEGER)", &[]).await?;
    let stmt = db.prepare_context(&bg, "INSERT INTO n(v) VALUES (?1)").await?;
    assert_eq!(stmt.num_input(), Some(1));
    for v in 0..3 {
        stmt.exec(&bg, &NamedValue::positional(&[Value::from(v)]))
            .await?;
    }
    stmt.close().await?;
    assert!(stmt.exec(&bg, &[]).await.is_err());

    let rows = db
        .query_context(&bg, "SELECT COUNT(*) AS cnt FROM n", &[])
        .await?;
    assert_eq!(rows.get(0, "cnt").and_then(Value::as_int), Some(3));
    db.ping(&bg).await?;
    Ok(())
}

#[tokio::test]
async fn connection_returned_with_open_transaction_is_not_reused()
-> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let dsn = dir.path().join("reset.db").to_string_lossy().into_owned();
    let db = Database::builder()
        .max_size(1)
        .build(ProxyConnector::new(SqliteDriver::new(), dsn, Handlers::new()))
        .await?;
    let bg = Context::background();

    let conn = db.conn(&bg).await?;
    let mut leftover = conn.raw().begin().await?;
    let err = conn.proxy().reset_session(&bg).await.unwrap_err();
    assert!(matches!(err, TxxError::ConnectionError(_)), "{err}");
    drop(conn);

    db.ping(&bg).await?;
    assert_eq!(db.state().statistics.connections_closed_invalid, 1);

    leftover.rollback().await?;
    Ok(())
}
