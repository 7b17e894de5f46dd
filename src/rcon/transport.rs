use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, lookup_host};

use super::error::RconError;
use crate::models::server::Destination;

/// Any bidirectional byte stream the client can frame packets over.
pub trait RconStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> RconStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn RconStream>;

/// Opens one exclusive connection to a destination per call.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, destination: &Destination) -> Result<BoxedStream, RconError>;
}

/// Resolves the host and dials each address in turn until one accepts.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, destination: &Destination) -> Result<BoxedStream, RconError> {
        let addrs = lookup_host((destination.host.as_str(), destination.port))
            .await
            .map_err(|e| {
                RconError::HostUnreachable(format!("cannot resolve {}: {}", destination.host, e))
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::debug!("🔌 TCP connected to {} ({})", destination, addr);
                    return Ok(Box::new(stream));
                }
                Err(e) => {
                    tracing::debug!("TCP connect to {} failed: {}", addr, e);
                    last_error = Some(RconError::from(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RconError::HostUnreachable(format!("{} resolved to no addresses", destination.host))
        }))
    }
}
