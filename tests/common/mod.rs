#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sql_txx::driver::{
    ConnBeginTx, ConnPrepareContext, Connector, Driver, DriverContext, ExecerContext,
    NamedValueChecker, Pinger, QueryerContext, RawConnection, SessionResetter, Statement,
    Transaction,
};
use sql_txx::{Context, ExecResult, NamedValue, Rows, TxLogger, TxOptions, TxxError, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open(usize),
    Begin(usize),
    Commit(usize),
    Rollback(usize),
    Exec(usize, String),
    Query(usize, String),
    Prepare(usize, String),
    Close(usize),
}

/// Which optional capabilities mock connections advertise.
#[derive(Debug, Clone, Copy)]
pub struct Caps {
    pub query: bool,
    pub exec: bool,
    pub prepare: bool,
    pub begin_tx: bool,
    pub ping: bool,
    pub reset: bool,
    pub check: bool,
}

impl Caps {
    pub fn all() -> Self {
        Self {
            query: true,
            exec: true,
            prepare: true,
            begin_tx: true,
            ping: true,
            reset: true,
            check: true,
        }
    }

    pub fn none() -> Self {
        Self {
            query: false,
            exec: false,
            prepare: false,
            begin_tx: false,
            ping: false,
            reset: false,
            check: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Failures {
    pub commit: bool,
    pub rollback: bool,
    pub close: bool,
}

struct Shared {
    events: Mutex<Vec<Event>>,
    next_id: AtomicUsize,
    caps: Caps,
    fail: Failures,
    context_opener: bool,
}

impl Shared {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Driver whose connections record everything done to them.
#[derive(Clone)]
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::build(Caps::all(), Failures::default(), false)
    }

    pub fn with_caps(caps: Caps) -> Self {
        Self::build(caps, Failures::default(), false)
    }

    pub fn failing(fail: Failures) -> Self {
        Self::build(Caps::all(), fail, false)
    }

    pub fn with_context_opener() -> Self {
        Self::build(Caps::all(), Failures::default(), true)
    }

    fn build(caps: Caps, fail: Failures, context_opener: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                events: Mutex::new(Vec::new()),
                next_id: AtomicUsize::new(1),
                caps,
                fail,
                context_opener,
            }),
        }
    }

    /// A connection opened outside any pool.
    pub fn connection(&self) -> MockConn {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.record(Event::Open(id));
        MockConn {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn begin_ids(&self) -> Vec<usize> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::Begin(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Connection ids that saw an exec, query or prepare of `sql`.
    pub fn conns_running(&self, sql: &str) -> Vec<usize> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::Exec(id, q) | Event::Query(id, q) | Event::Prepare(id, q) if q == sql => {
                    Some(*id)
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn open(&self, dsn: &str) -> Result<Box<dyn RawConnection>, TxxError> {
        if dsn == "unreachable" {
            return Err(TxxError::ConnectionError("mock: unreachable".into()));
        }
        Ok(Box::new(self.connection()))
    }

    fn context_opener(&self) -> Option<&dyn DriverContext> {
        if self.shared.context_opener {
            Some(self)
        } else {
            None
        }
    }
}

impl DriverContext for MockDriver {
    fn open_connector(&self, dsn: &str) -> Result<Box<dyn Connector>, TxxError> {
        if dsn == "bad-dsn" {
            return Err(TxxError::ConnectionError("mock: cannot parse dsn".into()));
        }
        Ok(Box::new(MockConnector {
            driver: self.clone(),
        }))
    }
}

struct MockConnector {
    driver: MockDriver,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, ctx: &Context) -> Result<Box<dyn RawConnection>, TxxError> {
        ctx.check()?;
        Ok(Box::new(self.driver.connection()))
    }
}

pub struct MockConn {
    pub id: usize,
    shared: Arc<Shared>,
}

impl MockConn {
    fn tx(&self) -> Box<dyn Transaction> {
        self.shared.record(Event::Begin(self.id));
        Box::new(MockTx {
            id: self.id,
            shared: Arc::clone(&self.shared),
        })
    }

    fn stmt(&self, query: &str) -> Box<dyn Statement> {
        self.shared.record(Event::Prepare(self.id, query.to_string()));
        Box::new(MockStmt {
            id: self.id,
            query: query.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }
}

#[async_trait]
impl RawConnection for MockConn {
    async fn prepare(&self, query: &str) -> Result<Box<dyn Statement>, TxxError> {
        Ok(self.stmt(query))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, TxxError> {
        Ok(self.tx())
    }

    async fn close(&self) -> Result<(), TxxError> {
        self.shared.record(Event::Close(self.id));
        if self.shared.fail.close {
            return Err(TxxError::ConnectionError("mock: close failed".into()));
        }
        Ok(())
    }

    fn queryer(&self) -> Option<&dyn QueryerContext> {
        self.shared.caps.query.then_some(self as &dyn QueryerContext)
    }

    fn execer(&self) -> Option<&dyn ExecerContext> {
        self.shared.caps.exec.then_some(self as &dyn ExecerContext)
    }

    fn preparer(&self) -> Option<&dyn ConnPrepareContext> {
        self.shared.caps.prepare.then_some(self as &dyn ConnPrepareContext)
    }

    fn tx_beginner(&self) -> Option<&dyn ConnBeginTx> {
        self.shared.caps.begin_tx.then_some(self as &dyn ConnBeginTx)
    }

    fn pinger(&self) -> Option<&dyn Pinger> {
        self.shared.caps.ping.then_some(self as &dyn Pinger)
    }

    fn session_resetter(&self) -> Option<&dyn SessionResetter> {
        self.shared.caps.reset.then_some(self as &dyn SessionResetter)
    }

    fn value_checker(&self) -> Option<&dyn NamedValueChecker> {
        self.shared.caps.check.then_some(self as &dyn NamedValueChecker)
    }
}

#[async_trait]
impl QueryerContext for MockConn {
    async fn query_context(
        &self,
        _ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<Rows, TxxError> {
        self.shared.record(Event::Query(self.id, query.to_string()));
        let id = i64::try_from(self.id).unwrap();
        let mut columns = vec!["conn".to_string()];
        let mut row = vec![Value::Integer(id)];
        for arg in args {
            columns.push(format!("arg{}", arg.ordinal));
            row.push(arg.value.clone());
        }
        Ok(Rows::new(columns, vec![row]))
    }
}

#[async_trait]
impl ExecerContext for MockConn {
    async fn exec_context(
        &self,
        _ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, TxxError> {
        self.shared.record(Event::Exec(self.id, query.to_string()));
        Ok(ExecResult {
            rows_affected: args.len() as u64,
            last_insert_id: Some(i64::try_from(self.id).unwrap()),
        })
    }
}

#[async_trait]
impl ConnPrepareContext for MockConn {
    async fn prepare_context(
        &self,
        _ctx: &Context,
        query: &str,
    ) -> Result<Box<dyn Statement>, TxxError> {
        Ok(self.stmt(query))
    }
}

#[async_trait]
impl ConnBeginTx for MockConn {
    async fn begin_tx(
        &self,
        _ctx: &Context,
        _opts: TxOptions,
    ) -> Result<Box<dyn Transaction>, TxxError> {
        Ok(self.tx())
    }
}

#[async_trait]
impl Pinger for MockConn {
    async fn ping(&self, ctx: &Context) -> Result<(), TxxError> {
        ctx.check()
    }
}

#[async_trait]
impl SessionResetter for MockConn {
    async fn reset_session(&self, _ctx: &Context) -> Result<(), TxxError> {
        Ok(())
    }
}

impl NamedValueChecker for MockConn {
    fn check_named_value(&self, value: &mut NamedValue) -> Result<(), TxxError> {
        if let Value::Real(v) = value.value
            && v.is_nan()
        {
            return Err(TxxError::ExecutionError("mock: NaN rejected".into()));
        }
        Ok(())
    }
}

struct MockTx {
    id: usize,
    shared: Arc<Shared>,
}

#[async_trait]
impl Transaction for MockTx {
    async fn commit(&mut self) -> Result<(), TxxError> {
        self.shared.record(Event::Commit(self.id));
        if self.shared.fail.commit {
            return Err(TxxError::ExecutionError("mock: commit failed".into()));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TxxError> {
        self.shared.record(Event::Rollback(self.id));
        if self.shared.fail.rollback {
            return Err(TxxError::ExecutionError("mock: rollback failed".into()));
        }
        Ok(())
    }
}

struct MockStmt {
    id: usize,
    query: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl Statement for MockStmt {
    fn num_input(&self) -> Option<usize> {
        None
    }

    async fn exec(&self, _ctx: &Context, _args: &[NamedValue]) -> Result<ExecResult, TxxError> {
        self.shared.record(Event::Exec(self.id, self.query.clone()));
        Ok(ExecResult::default())
    }

    async fn query(&self, _ctx: &Context, _args: &[NamedValue]) -> Result<Rows, TxxError> {
        self.shared.record(Event::Query(self.id, self.query.clone()));
        Ok(Rows::default())
    }

    async fn close(&self) -> Result<(), TxxError> {
        Ok(())
    }
}

/// Logger keeping what it was told.
#[derive(Clone, Default)]
pub struct RecordingLogger {
    pub close_conn: Arc<Mutex<Vec<String>>>,
    pub rollback: Arc<Mutex<Vec<String>>>,
}

impl TxLogger for RecordingLogger {
    fn close_conn(&self, err: &TxxError) {
        self.close_conn.lock().unwrap().push(err.to_string());
    }

    fn rollback(&self, err: &TxxError) {
        self.rollback.lock().unwrap().push(err.to_string());
    }
}
