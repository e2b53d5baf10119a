//! Lazily established, closed-once connection slot.
//!
//! A facade owns one `Link`. The first operation that needs the socket dials
//! it; concurrent first callers share that single dial. After `close` no new
//! connection is ever made.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio_tungstenite::tungstenite::http::Uri;

use super::connection::{Connection, TransportConfig};
use super::socket::{ConnectRequest, Dialer};
use crate::credentials::CredentialsProvider;
use crate::error::{ConnectorError, Result};

pub struct Link {
    endpoint: Uri,
    credentials: Arc<dyn CredentialsProvider>,
    dialer: Arc<dyn Dialer>,
    config: TransportConfig,
    connection: OnceCell<Arc<Connection>>,
    closed: AtomicBool,
}

impl Link {
    pub fn new(
        endpoint: Uri,
        credentials: Arc<dyn CredentialsProvider>,
        dialer: Arc<dyn Dialer>,
        config: TransportConfig,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            dialer,
            config,
            connection: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The connection if it has been established.
    pub fn current(&self) -> Option<&Arc<Connection>> {
        self.connection.get()
    }

    /// Return the connection, dialing it on first use.
    ///
    /// A failed dial leaves the slot empty so a later call can retry.
    pub async fn connection(&self) -> Result<&Arc<Connection>> {
        if self.is_closed() {
            return Err(ConnectorError::ConnectionClosed);
        }

        let conn = self
            .connection
            .get_or_try_init(|| async {
                let token = self.credentials.token().await?;
                let request = ConnectRequest::new(self.endpoint.clone(), token);
                let conn =
                    Connection::connect(self.dialer.as_ref(), request, self.config.clone()).await?;
                Ok::<_, ConnectorError>(Arc::new(conn))
            })
            .await?;

        // close() may have run while we were dialing.
        if self.is_closed() {
            conn.close().await;
            return Err(ConnectorError::ConnectionClosed);
        }
        Ok(conn)
    }

    /// Close the connection if there is one and refuse any later dial.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(conn) = self.connection.get() {
            conn.close().await;
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("endpoint", &self.endpoint)
            .field("connection", &self.connection.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}
