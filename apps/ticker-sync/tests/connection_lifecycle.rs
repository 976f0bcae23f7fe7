//! Connection Lifecycle Integration Tests
//!
//! Drives the streaming connection over a scripted transport with paused
//! time: keep-alive cadence, reconnect hygiene and self-heal.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::sleep;

use common::{FakeTransport, StaticSource, currencies_body, tickers_body};
use ticker_sync::infrastructure::korbit::ReconnectConfig;
use ticker_sync::{Connection, ConnectionConfig, ConnectionState, FeedClient, FeedConfig};

const ENDPOINT: &str = "wss://ws-api.korbit.co.kr/v2/public";

fn connection(transport: &FakeTransport) -> Connection {
    let config = ConnectionConfig {
        reconnect: ReconnectConfig::default().without_jitter(),
        ..ConnectionConfig::default()
    };
    Connection::new(Arc::new(transport.clone()), config)
}

/// Let spawned session tasks run without moving the clock meaningfully.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn repeated_reconnects_leave_one_timer_probing_every_interval() {
    let transport = FakeTransport::new();
    let conn = connection(&transport);

    conn.open(ENDPOINT).await.unwrap();
    for _ in 0..3 {
        conn.reconnect().await.unwrap();
    }
    settle().await;

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.status().generation, 4);
    assert_eq!(transport.connects(), 4);
    assert_eq!(conn.keep_alive_timers().started(), 4);
    assert_eq!(conn.keep_alive_timers().active(), 1);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.probes(), 1);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.probes(), 2);
    assert_eq!(conn.keep_alive_timers().active(), 1);

    conn.close().await;
    assert_eq!(conn.keep_alive_timers().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_peer_is_replaced_by_self_heal() {
    let transport = FakeTransport::new();
    transport.go_silent();
    let conn = connection(&transport);

    conn.open(ENDPOINT).await.unwrap();
    settle().await;

    sleep(Duration::from_secs(31)).await;
    assert_eq!(transport.probes(), 1);
    assert_eq!(transport.connects(), 1);

    // Probe at 30s, unanswered by the 10s acknowledgement deadline.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.probes(), 1);
    assert_eq!(transport.connects(), 2);
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.status().generation, 2);
    assert_eq!(conn.keep_alive_timers().active(), 1);

    conn.close().await;
}

#[tokio::test(start_paused = true)]
async fn refused_self_heal_backs_off_until_peer_returns() {
    let transport = FakeTransport::new();
    let conn = connection(&transport);
    conn.open(ENDPOINT).await.unwrap();
    settle().await;

    transport.refuse(true);
    transport.drop_session();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(transport.attempts(), 2);
    assert_eq!(conn.state(), ConnectionState::Reconnecting);
    assert_eq!(conn.keep_alive_timers().active(), 0);

    // Retries at +0.5s and +1.5s.
    sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.attempts(), 4);
    assert_eq!(conn.state(), ConnectionState::Reconnecting);

    transport.refuse(false);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(transport.connects(), 2);
    assert_eq!(conn.keep_alive_timers().active(), 1);

    conn.close().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn self_heal_gives_up_once_the_retry_budget_is_spent() {
    let transport = FakeTransport::new();
    let config = ConnectionConfig {
        reconnect: ReconnectConfig {
            max_attempts: Some(2),
            ..ReconnectConfig::default().without_jitter()
        },
        ..ConnectionConfig::default()
    };
    let conn = Connection::new(Arc::new(transport.clone()), config);
    conn.open(ENDPOINT).await.unwrap();
    settle().await;

    transport.refuse(true);
    transport.drop_session();
    sleep(Duration::from_secs(5)).await;

    // Open, the immediate attempt, then retries at +0.5s and +1.5s.
    assert_eq!(transport.attempts(), 4);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.keep_alive_timers().active(), 0);

    transport.refuse(false);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempts(), 4);

    conn.open(ENDPOINT).await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    conn.close().await;
}

#[tokio::test(start_paused = true)]
async fn every_handshake_after_a_loss_runs_in_connecting() {
    let transport = FakeTransport::new();
    let conn = connection(&transport);
    conn.open(ENDPOINT).await.unwrap();
    settle().await;

    transport.hold_handshakes(true);
    transport.drop_session();
    settle().await;
    assert_eq!(conn.state(), ConnectionState::Connecting);

    transport.hold_handshakes(false);
    settle().await;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.status().generation, 2);

    transport.hold_handshakes(true);
    let reconnecting = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.reconnect().await })
    };
    settle().await;
    assert_eq!(conn.state(), ConnectionState::Connecting);

    transport.hold_handshakes(false);
    reconnecting.await.unwrap().unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.status().generation, 3);

    conn.close().await;
}

#[tokio::test(start_paused = true)]
async fn open_is_idempotent_and_frames_flow_both_ways() {
    let transport = FakeTransport::new();
    let conn = connection(&transport);

    conn.open(ENDPOINT).await.unwrap();
    conn.open(ENDPOINT).await.unwrap();
    assert_eq!(transport.connects(), 1);

    let mut frames = conn.receive();
    transport.push("hello");
    assert_eq!(frames.next().await.as_deref(), Some("hello"));

    conn.send("ping me".to_string()).await.unwrap();
    settle().await;
    assert_eq!(transport.sent(), ["ping me"]);

    conn.close().await;
    assert_eq!(transport.closes(), 1);
    assert_eq!(frames.next().await, None);
    assert!(conn.send("late".to_string()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn subscription_is_resent_on_every_new_session() {
    let transport = FakeTransport::new();
    let source = Arc::new(StaticSource::new(
        &tickers_body(&[("btc_krw", "100")]),
        &currencies_body(&[("btc", "Bitcoin")]),
    ));
    let feed = FeedClient::new(source, connection(&transport), FeedConfig::default());

    feed.connect(ENDPOINT).await.unwrap();
    settle().await;
    assert!(transport.sent().is_empty());

    feed.subscribe(vec!["btc_krw".to_string()]).await;
    settle().await;
    assert_eq!(transport.sent().len(), 1);

    feed.reconnect().await.unwrap();
    settle().await;
    assert_eq!(transport.sent().len(), 2);

    transport.drop_session();
    settle().await;
    let sent = transport.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|frame| frame.contains("\"btc_krw\"")));
    assert_eq!(feed.connection().status().generation, 3);

    feed.shutdown().await;
    assert_eq!(feed.connection().state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn incremental_frames_follow_the_feed_across_sessions() {
    let transport = FakeTransport::new();
    let source = Arc::new(StaticSource::new(&tickers_body(&[]), &currencies_body(&[])));
    let feed = FeedClient::new(source, connection(&transport), FeedConfig::default());

    feed.connect(ENDPOINT).await.unwrap();
    let mut updates = feed.incremental_stream().unwrap();
    settle().await;

    transport.push("first");
    assert_eq!(updates.next().await.as_deref(), Some("first"));

    transport.drop_session();
    settle().await;
    transport.push("second");
    assert_eq!(updates.next().await.as_deref(), Some("second"));

    feed.shutdown().await;
}
