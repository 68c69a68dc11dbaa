//! Dialers used by [`Pool`](super::Pool) to open new connections.
//!
//! A [`Connector`] knows the one remote address a pool is bound to and how to
//! establish and tear down a transport handle for it. The pool itself never
//! looks inside a connection.

use core::future::Future;
use core::time::Duration;
use tonic::transport::{Channel, Endpoint};
use userstats_core::{Error, Result};

/// Opens and closes connections to a single fixed target.
pub trait Connector: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// The remote address every connection from this connector points at.
    fn target(&self) -> &str;

    /// Establishes a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the remote cannot be reached.
    fn connect(&self) -> impl Future<Output = Result<Self::Conn>> + Send;

    /// Tears a connection down. The default simply drops it.
    fn close(&self, conn: Self::Conn) {
        drop(conn);
    }
}

/// Dials the points service over HTTP/2 with `tonic`.
///
/// Each connection is an eagerly connected [`Channel`], so an unreachable
/// points service surfaces as [`Error::Connect`] from `Pool::get` rather than
/// on the first RPC.
#[derive(Clone, Debug)]
pub struct GrpcConnector {
    target: String,
    endpoint: Endpoint,
}

impl GrpcConnector {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `target` is not a valid URI.
    pub fn new(target: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let target = target.into();
        let endpoint = Endpoint::from_shared(target.clone())
            .map_err(|e| Error::config(format!("invalid target '{target}': {e}")))?
            .connect_timeout(connect_timeout)
            .tcp_nodelay(true);

        Ok(Self { target, endpoint })
    }
}

impl Connector for GrpcConnector {
    type Conn = Channel;

    fn target(&self) -> &str {
        &self.target
    }

    async fn connect(&self) -> Result<Channel> {
        self.endpoint
            .connect()
            .await
            .map_err(|e| Error::Connect {
                target: self.target.clone(),
                reason: e.to_string(),
            })
    }
}
