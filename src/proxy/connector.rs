use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bb8::ManageConnection;
use tracing::debug;

use crate::context::Context;
use crate::driver::{Connector, Driver, RawConnection};
use crate::error::TxxError;

use super::conn::ProxyConnection;
use super::middleware::Handlers;

/// Opens driver connections and wraps each one in a [`ProxyConnection`].
///
/// Doubles as the `bb8` manager behind [`crate::Database`].
#[derive(Clone)]
pub struct ProxyConnector {
    driver: Arc<dyn Driver>,
    dsn: String,
    handlers: Handlers,
}

impl ProxyConnector {
    #[must_use]
    pub fn new(driver: impl Driver, dsn: impl Into<String>, handlers: Handlers) -> Self {
        Self::from_shared(Arc::new(driver), dsn, handlers)
    }

    #[must_use]
    pub fn from_shared(driver: Arc<dyn Driver>, dsn: impl Into<String>, handlers: Handlers) -> Self {
        Self {
            driver,
            dsn: dsn.into(),
            handlers,
        }
    }

    /// Connect through the driver's context-aware connector when it has one,
    /// its plain `open` otherwise. Both paths come back wrapped.
    ///
    /// # Errors
    /// Returns `TxxError::OpenConnector` if the driver can't build a connector,
    /// or the driver's connect/open failure.
    pub async fn connect_proxy(&self, ctx: &Context) -> Result<ProxyConnection, TxxError> {
        ctx.check()?;
        let raw = if let Some(opener) = self.driver.context_opener() {
            let connector = opener
                .open_connector(&self.dsn)
                .map_err(|e| TxxError::OpenConnector(Box::new(e)))?;
            connector.connect(ctx).await?
        } else {
            self.driver.open(&self.dsn).await?
        };
        debug!("opened driver connection");
        Ok(ProxyConnection::new(raw, self.handlers.clone()))
    }

    /// The wrapped driver.
    #[must_use]
    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    #[must_use]
    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }
}

impl fmt::Debug for ProxyConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConnector")
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for ProxyConnector {
    async fn connect(&self, ctx: &Context) -> Result<Box<dyn RawConnection>, TxxError> {
        let conn = self.connect_proxy(ctx).await?;
        Ok(Box::new(conn))
    }
}

impl ManageConnection for ProxyConnector {
    type Connection = ProxyConnection;
    type Error = TxxError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        async move {
            let ctx = Context::background();
            self.connect_proxy(&ctx).await
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            let ctx = Context::background();
            ignore_unsupported(conn.reset_session(&ctx).await)?;
            ignore_unsupported(conn.ping(&ctx).await)
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_broken()
    }
}

fn ignore_unsupported(result: Result<(), TxxError>) -> Result<(), TxxError> {
    match result {
        Err(TxxError::UnsupportedOperation(_)) => Ok(()),
        other => other,
    }
}
