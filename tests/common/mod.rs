#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio_util::codec::Framed;

use rcon_gate::clock::ManualClock;
use rcon_gate::crypto::{aes, cipher::CredentialCipher};
use rcon_gate::models::server::Destination;
use rcon_gate::rcon::client::{RconClient, RconSettings};
use rcon_gate::rcon::error::RconError;
use rcon_gate::rcon::packet::{AUTH_FAILED_ID, Packet, RconCodec, SERVERDATA_AUTH, SERVERDATA_EXECCOMMAND};
use rcon_gate::rcon::retry::RetryPolicy;
use rcon_gate::rcon::transport::{BoxedStream, Connector};
use rcon_gate::repositories::memory::MemoryGateway;
use rcon_gate::services::session::{SessionAuthority, SessionPolicy};
use rcon_gate::services::session_cache::MemorySessionCache;

pub const PASSWORD: &str = "secret";
pub const PLAYERS: &str = "There are 2/20 players online: Alice, Bob";

pub fn destination() -> Destination {
    Destination::new("example.org", 25575)
}

/// What the mock server does with one incoming connection.
#[derive(Clone)]
pub enum Plan {
    /// Accepts `password` and answers commands from `replies`, one packet
    /// per fragment. Unknown commands get a single error line.
    Serve {
        password: String,
        replies: HashMap<String, Vec<String>>,
        empty_packet_before_auth: bool,
    },
    /// Accepts the connection and never writes a byte.
    Silent,
    /// Refuses the connection.
    Refuse,
}

impl Plan {
    /// A server that knows `list` and `say`.
    pub fn minecraft() -> Self {
        Plan::Serve {
            password: PASSWORD.to_string(),
            replies: HashMap::from([
                ("list".to_string(), vec![PLAYERS.to_string()]),
                ("say hi".to_string(), vec![String::new()]),
            ]),
            empty_packet_before_auth: false,
        }
    }

    pub fn with_reply(mut self, command: &str, fragments: &[&str]) -> Self {
        if let Plan::Serve { replies, .. } = &mut self {
            replies.insert(
                command.to_string(),
                fragments.iter().map(|f| f.to_string()).collect(),
            );
        }
        self
    }

    pub fn with_source_quirk(mut self) -> Self {
        if let Plan::Serve {
            empty_packet_before_auth,
            ..
        } = &mut self
        {
            *empty_packet_before_auth = true;
        }
        self
    }
}

/// Hands out in-memory connections, each driven by the next queued plan
/// or by the fallback once the queue is empty.
pub struct MockConnector {
    queued: Mutex<VecDeque<Plan>>,
    fallback: Mutex<Plan>,
    attempts: AtomicU32,
}

impl MockConnector {
    pub fn new(fallback: Plan) -> Arc<Self> {
        Arc::new(Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            attempts: AtomicU32::new(0),
        })
    }

    pub fn queue(&self, plan: Plan) {
        self.queued.lock().unwrap().push_back(plan);
    }

    pub fn set_fallback(&self, plan: Plan) {
        *self.fallback.lock().unwrap() = plan;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    fn next_plan(&self) -> Plan {
        self.queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, destination: &Destination) -> Result<BoxedStream, RconError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);

        match self.next_plan() {
            Plan::Refuse => {
                return Err(RconError::ConnectionRefused(format!("{} refused", destination)));
            }
            Plan::Silent => {
                tokio::spawn(swallow(server));
            }
            Plan::Serve {
                password,
                replies,
                empty_packet_before_auth,
            } => {
                tokio::spawn(serve(server, password, replies, empty_packet_before_auth));
            }
        }

        Ok(Box::new(client))
    }
}

async fn swallow(mut stream: DuplexStream) {
    let mut buf = [0u8; 1024];
    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 {
            break;
        }
    }
}

async fn serve(
    stream: DuplexStream,
    password: String,
    replies: HashMap<String, Vec<String>>,
    empty_packet_before_auth: bool,
) {
    let mut framed = Framed::new(stream, RconCodec);

    while let Some(Ok(packet)) = framed.next().await {
        match packet.kind {
            SERVERDATA_AUTH => {
                if empty_packet_before_auth {
                    let _ = framed.send(Packet::response(packet.request_id, "")).await;
                }
                if packet.body == password {
                    let _ = framed.send(Packet::auth_response(packet.request_id)).await;
                } else {
                    let _ = framed.send(Packet::auth_response(AUTH_FAILED_ID)).await;
                    return;
                }
            }
            SERVERDATA_EXECCOMMAND => {
                let fragments = replies
                    .get(&packet.body)
                    .cloned()
                    .unwrap_or_else(|| vec![format!("Unknown command: {}", packet.body)]);
                for fragment in fragments {
                    let _ = framed.send(Packet::response(packet.request_id, fragment)).await;
                }
            }
            _ => return,
        }
    }
}

pub fn settings() -> RconSettings {
    RconSettings {
        io_timeout: Duration::from_millis(150),
        fragment_window: Duration::from_millis(40),
    }
}

pub fn client(connector: Arc<MockConnector>, retry: RetryPolicy) -> RconClient {
    RconClient::new(connector, settings(), retry)
}

/// A session authority over in-memory storage and a manual clock.
pub struct Harness {
    pub authority: Arc<SessionAuthority>,
    pub gateway: MemoryGateway,
    pub cache: MemorySessionCache,
    pub clock: Arc<ManualClock>,
    pub connector: Arc<MockConnector>,
}

impl Harness {
    pub fn new(policy: SessionPolicy) -> Self {
        Self::with_connector(policy, MockConnector::new(Plan::minecraft()))
    }

    pub fn with_connector(policy: SessionPolicy, connector: Arc<MockConnector>) -> Self {
        let clock = Arc::new(ManualClock::default());
        let gateway = MemoryGateway::new(clock.clone());
        let cache = MemorySessionCache::new();
        let cipher = CredentialCipher::from_key(aes::generate_key());
        let rcon = client(
            connector.clone(),
            RetryPolicy::fixed(1, Duration::from_millis(10)),
        );

        let authority = SessionAuthority::new(
            Arc::new(gateway.clone()),
            Arc::new(cache.clone()),
            Arc::new(cipher),
            rcon,
            clock.clone(),
            policy,
        );

        Self {
            authority: Arc::new(authority),
            gateway,
            cache,
            clock,
            connector,
        }
    }
}
