mod common;

use std::time::{Duration, Instant};

use common::{MockConnector, PASSWORD, PLAYERS, Plan, client, destination, settings};
use rcon_gate::models::server::Destination;
use rcon_gate::rcon::client::{PROBE_COMMAND, RconClient, RconSettings};
use rcon_gate::rcon::error::{ErrorKind, RconError};
use rcon_gate::rcon::retry::RetryPolicy;

fn retry() -> RetryPolicy {
    RetryPolicy::fixed(3, Duration::from_millis(50))
}

// Real sockets; name resolution gets more time than the in-memory pipes need.
fn tcp_client() -> RconClient {
    let settings = RconSettings {
        io_timeout: Duration::from_secs(5),
        ..settings()
    };
    RconClient::tcp(settings, RetryPolicy::no_retry())
}

#[tokio::test]
async fn execute_returns_the_servers_reply() {
    let connector = MockConnector::new(Plan::minecraft());
    let rcon = client(connector.clone(), retry());

    let output = rcon.execute(&destination(), PASSWORD, "list").await.unwrap();

    assert_eq!(output, PLAYERS);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn probe_confirms_the_server_executes_commands() {
    let connector = MockConnector::new(Plan::minecraft());
    let rcon = client(connector, retry());

    let report = rcon.test_connection(&destination(), PASSWORD).await.unwrap();

    assert_eq!(PROBE_COMMAND, "list");
    assert_eq!(report.response, PLAYERS);
    assert!(!report.detail.is_empty());
}

#[tokio::test]
async fn rejected_credential_is_not_retried() {
    let connector = MockConnector::new(Plan::minecraft());
    let rcon = client(connector.clone(), retry());

    let err = rcon.test_connection(&destination(), "wrong").await.unwrap_err();

    assert!(matches!(err, RconError::AuthenticationRejected));
    assert_eq!(err.kind(), ErrorKind::AuthenticationRejected);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn two_timeouts_then_success_takes_three_attempts() {
    let connector = MockConnector::new(Plan::minecraft());
    connector.queue(Plan::Silent);
    connector.queue(Plan::Silent);
    let rcon = client(connector.clone(), retry());
    let started = Instant::now();

    let output = rcon.execute(&destination(), PASSWORD, "list").await.unwrap();

    assert_eq!(output, PLAYERS);
    assert_eq!(connector.attempts(), 3);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn persistent_timeouts_exhaust_the_budget() {
    let connector = MockConnector::new(Plan::Silent);
    let rcon = client(connector.clone(), retry());

    let err = rcon.execute(&destination(), PASSWORD, "list").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(connector.attempts(), 3);
}

#[tokio::test]
async fn refused_connections_are_reported_as_such() {
    let connector = MockConnector::new(Plan::Refuse);
    let rcon = client(connector.clone(), RetryPolicy::fixed(2, Duration::from_millis(1)));

    let err = rcon.test_connection(&destination(), PASSWORD).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test]
async fn multi_packet_replies_are_reassembled() {
    let connector = MockConnector::new(
        Plan::minecraft().with_reply("banlist", &["There are 3 bans: ", "Steve, ", "Alex, Herobrine"]),
    );
    let rcon = client(connector, retry());

    let output = rcon.execute(&destination(), PASSWORD, "banlist").await.unwrap();

    assert_eq!(output, "There are 3 bans: Steve, Alex, Herobrine");
}

#[tokio::test]
async fn empty_reply_is_not_an_error() {
    let connector = MockConnector::new(Plan::minecraft());
    let rcon = client(connector, retry());

    let output = rcon.execute(&destination(), PASSWORD, "say hi").await.unwrap();

    assert_eq!(output, "");
}

#[tokio::test]
async fn empty_packet_before_auth_verdict_is_skipped() {
    let connector = MockConnector::new(Plan::minecraft().with_source_quirk());
    let rcon = client(connector, retry());

    let output = rcon.execute(&destination(), PASSWORD, "list").await.unwrap();

    assert_eq!(output, PLAYERS);
}

#[tokio::test]
async fn every_attempt_uses_a_fresh_connection() {
    let connector = MockConnector::new(Plan::minecraft());
    let rcon = client(connector.clone(), retry());

    rcon.execute(&destination(), PASSWORD, "list").await.unwrap();
    rcon.execute(&destination(), PASSWORD, "list").await.unwrap();

    assert_eq!(connector.attempts(), 2);
}

#[tokio::test]
async fn tcp_unresolvable_host_is_host_unreachable() {
    let rcon = tcp_client();

    let err = rcon
        .test_connection(&Destination::new("no-such-host.invalid", 25575), PASSWORD)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HostUnreachable);
}

#[tokio::test]
async fn tcp_closed_port_is_connection_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let rcon = tcp_client();

    let err = rcon
        .test_connection(&Destination::new("127.0.0.1", port), PASSWORD)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
}
