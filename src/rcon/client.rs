use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use super::error::RconError;
use super::packet::{
    AUTH_FAILED_ID, Packet, RconCodec, SERVERDATA_AUTH_RESPONSE, SERVERDATA_RESPONSE_VALUE,
};
use super::retry::RetryPolicy;
use super::transport::{BoxedStream, Connector, TcpConnector};
use crate::models::server::Destination;

/// The command used to prove a freshly authenticated connection executes commands.
pub const PROBE_COMMAND: &str = "list";

/// Timing knobs for a single attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RconSettings {
    /// Applies separately to connect, each write, and the first read of each reply.
    pub io_timeout: Duration,
    /// How long to wait for a further fragment before a reply is considered complete.
    pub fragment_window: Duration,
}

impl Default for RconSettings {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(10),
            fragment_window: Duration::from_millis(100),
        }
    }
}

/// The result of a successful [`RconClient::test_connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Human-readable summary of what the probe saw.
    pub detail: String,
    /// The server's answer to the probe command, possibly empty.
    pub response: String,
}

type RconFramed = Framed<BoxedStream, RconCodec>;

/// Runs each operation on its own connection: connect, authenticate, then
/// execute. Connections are never reused after an error or a reply.
#[derive(Clone)]
pub struct RconClient {
    connector: Arc<dyn Connector>,
    settings: RconSettings,
    retry: RetryPolicy,
}

impl RconClient {
    pub fn new(connector: Arc<dyn Connector>, settings: RconSettings, retry: RetryPolicy) -> Self {
        Self {
            connector,
            settings,
            retry,
        }
    }

    /// A client that dials real TCP connections.
    pub fn tcp(settings: RconSettings, retry: RetryPolicy) -> Self {
        Self::new(Arc::new(TcpConnector), settings, retry)
    }

    pub fn settings(&self) -> &RconSettings {
        &self.settings
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Authenticates against `destination` and runs a harmless query to make
    /// sure the server really executes commands.
    ///
    /// # Errors
    ///
    /// Returns the first permanent failure, or the last transient one once the
    /// retry budget is spent. Each [`ErrorKind`](super::error::ErrorKind) is
    /// distinct so callers can tell a DNS failure from a refused port, a
    /// timeout, or a wrong credential.
    pub async fn test_connection(
        &self,
        destination: &Destination,
        credential: &str,
    ) -> Result<ProbeReport, RconError> {
        tracing::info!("🔍 Testing RCON connection to {}", destination);

        let response = self
            .retry
            .run("test_connection", move |attempt| {
                self.attempt(destination, credential, PROBE_COMMAND, attempt)
            })
            .await?;

        let detail = if response.is_empty() {
            tracing::warn!("⚠️  {} accepted the credential but answered the probe with nothing", destination);
            "connected; the server answered the probe with an empty message".to_string()
        } else {
            tracing::info!("✅ RCON connection to {} verified", destination);
            "connected; the server executes commands".to_string()
        };

        Ok(ProbeReport { detail, response })
    }

    /// Authenticates and executes `command`, returning the reassembled reply.
    ///
    /// A command the server answers with nothing yields an empty string.
    pub async fn execute(
        &self,
        destination: &Destination,
        credential: &str,
        command: &str,
    ) -> Result<String, RconError> {
        self.retry
            .run("execute", move |attempt| self.attempt(destination, credential, command, attempt))
            .await
    }

    /// One complete connect → auth → exec cycle on a fresh connection.
    async fn attempt(
        &self,
        destination: &Destination,
        credential: &str,
        command: &str,
        attempt: u32,
    ) -> Result<String, RconError> {
        tracing::debug!(
            "RCON attempt {}/{} against {}",
            attempt,
            self.retry.max_attempts,
            destination
        );

        let stream = timeout(self.settings.io_timeout, self.connector.connect(destination))
            .await
            .map_err(|_| RconError::Timeout(format!("connecting to {}", destination)))??;
        let mut framed = Framed::new(stream, RconCodec);

        let (auth_id, command_id) = request_ids();
        self.authenticate(&mut framed, auth_id, credential).await?;
        tracing::debug!("🔐 RCON authenticated on {}", destination);

        self.send(&mut framed, Packet::exec(command_id, command)).await?;
        let response = self.read_response(&mut framed, command_id).await?;

        Ok(response.trim().to_string())
    }

    async fn authenticate(
        &self,
        framed: &mut RconFramed,
        auth_id: i32,
        credential: &str,
    ) -> Result<(), RconError> {
        self.send(framed, Packet::auth(auth_id, credential)).await?;

        loop {
            let packet = self.recv(framed, "authentication reply").await?;

            match packet.kind {
                SERVERDATA_AUTH_RESPONSE if packet.request_id == AUTH_FAILED_ID => {
                    return Err(RconError::AuthenticationRejected);
                }
                SERVERDATA_AUTH_RESPONSE if packet.request_id == auth_id => return Ok(()),
                SERVERDATA_AUTH_RESPONSE => {
                    return Err(RconError::MalformedResponse(format!(
                        "auth reply echoes request id {} instead of {}",
                        packet.request_id, auth_id
                    )));
                }
                // Source-engine servers send an empty value packet before the verdict.
                SERVERDATA_RESPONSE_VALUE if packet.body.is_empty() => continue,
                other => {
                    return Err(RconError::MalformedResponse(format!(
                        "unexpected packet type {} during authentication",
                        other
                    )));
                }
            }
        }
    }

    /// Reads the first fragment with the full timeout, then keeps appending
    /// fragments for the same request until the stream stays quiet for
    /// `fragment_window`.
    async fn read_response(&self, framed: &mut RconFramed, command_id: i32) -> Result<String, RconError> {
        let first = self.recv(framed, "command reply").await?;
        check_response(&first, command_id)?;
        let mut body = first.body.clone();
        let mut fragments = 1u32;

        loop {
            match timeout(self.settings.fragment_window, framed.next()).await {
                Err(_) => break,
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(packet))) => {
                    check_response(&packet, command_id)?;
                    body.push_str(&packet.body);
                    fragments += 1;
                }
            }
        }

        tracing::debug!("RCON reply reassembled from {} fragment(s), {} bytes", fragments, body.len());
        Ok(body)
    }

    async fn send(&self, framed: &mut RconFramed, packet: Packet) -> Result<(), RconError> {
        timeout(self.settings.io_timeout, framed.send(packet))
            .await
            .map_err(|_| RconError::Timeout("writing to server".to_string()))?
    }

    async fn recv(&self, framed: &mut RconFramed, waiting_for: &str) -> Result<Packet, RconError> {
        match timeout(self.settings.io_timeout, framed.next()).await {
            Err(_) => Err(RconError::Timeout(format!("waiting for {}", waiting_for))),
            Ok(None) => Err(RconError::ConnectionReset(format!(
                "server closed the connection while waiting for {}",
                waiting_for
            ))),
            Ok(Some(result)) => result,
        }
    }
}

fn check_response(packet: &Packet, command_id: i32) -> Result<(), RconError> {
    if packet.request_id == AUTH_FAILED_ID {
        return Err(RconError::AuthenticationRejected);
    }
    if packet.kind != SERVERDATA_RESPONSE_VALUE || packet.request_id != command_id {
        return Err(RconError::MalformedResponse(format!(
            "expected reply to request {}, got type {} for request {}",
            command_id, packet.kind, packet.request_id
        )));
    }
    Ok(())
}

/// Two distinct positive request ids for the auth and exec packets.
fn request_ids() -> (i32, i32) {
    let mut rng = rand::thread_rng();
    let auth_id = rng.gen_range(1..i32::MAX);
    let mut command_id = rng.gen_range(1..i32::MAX);
    while command_id == auth_id {
        command_id = rng.gen_range(1..i32::MAX);
    }
    (auth_id, command_id)
}
