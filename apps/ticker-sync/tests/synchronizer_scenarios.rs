//! Synchronizer Integration Tests
//!
//! End-to-end merge scenarios through the public handle, plus the engine
//! wired to a scripted feed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout};

use common::{
    CountingStore, FakeTransport, StaticSource, currencies_body, ticker_frame, tickers_body,
};
use ticker_sync::{
    BookmarkStore, Connection, ConnectionConfig, EngineSettings, FeedClient, FeedConfig,
    MergeOutcome, NoticeKind, SnapshotPayload, SortDirection, SortKey, SyncEngine, SyncError,
    SyncHandle, SyncSettings, TableEvent,
};
use tokio_util::sync::CancellationToken;

fn snapshot(tickers: &[(&str, &str)], currencies: &[(&str, &str)]) -> SnapshotPayload {
    SnapshotPayload {
        tickers: tickers_body(tickers),
        currencies: Some(currencies_body(currencies)),
        fetched_at: Utc::now(),
    }
}

fn spawn(store: &Arc<CountingStore>) -> SyncHandle {
    let store: Arc<dyn BookmarkStore> = Arc::<CountingStore>::clone(store);
    SyncHandle::spawn(store, SyncSettings::default())
}

#[tokio::test]
async fn stream_update_keeps_name_and_bookmark() {
    let store = Arc::new(CountingStore::with(&["btc_krw"]));
    let sync = spawn(&store);

    sync.ingest_snapshot(&snapshot(&[("btc_krw", "100")], &[("btc", "Bitcoin")]))
        .await
        .unwrap();
    let row = sync.view().get("btc_krw").cloned().unwrap();
    assert_eq!(row.full_name.as_deref(), Some("Bitcoin"));
    assert!(row.bookmark);

    let outcomes = sync.ingest_frame(&ticker_frame("btc_krw", "101")).await.unwrap();
    assert!(matches!(outcomes.as_slice(), [MergeOutcome::Applied(_)]));

    let view = sync.view();
    let row = view.get("btc_krw").unwrap();
    assert_eq!(row.data.close, "101");
    assert_eq!(row.full_name.as_deref(), Some("Bitcoin"));
    assert!(row.bookmark);
    assert_eq!(view.len(), 1);

    sync.shutdown().await;
}

#[tokio::test]
async fn repeated_snapshot_and_identical_push_change_nothing() {
    let store = Arc::new(CountingStore::default());
    let sync = spawn(&store);
    let payload = snapshot(
        &[("btc_krw", "100"), ("eth_krw", "50")],
        &[("btc", "Bitcoin"), ("eth", "Ethereum")],
    );

    sync.ingest_snapshot(&payload).await.unwrap();
    let first = sync.view();

    let outcome = sync.ingest_snapshot(&payload).await.unwrap();
    assert!(!outcome.universe_changed());
    assert_eq!(sync.view().rows(), first.rows());

    let outcomes = sync.ingest_frame(&ticker_frame("eth_krw", "50")).await.unwrap();
    assert_eq!(outcomes, [MergeOutcome::Unchanged]);
    assert_eq!(sync.view().rows(), first.rows());

    sync.shutdown().await;
}

#[tokio::test]
async fn unknown_symbol_push_is_dropped() {
    let store = Arc::new(CountingStore::default());
    let sync = spawn(&store);
    sync.ingest_snapshot(&snapshot(&[("btc_krw", "100")], &[]))
        .await
        .unwrap();

    let outcomes = sync.ingest_frame(&ticker_frame("doge_krw", "1")).await.unwrap();

    assert_eq!(outcomes, [MergeOutcome::UnknownSymbol]);
    assert!(sync.view().get("doge_krw").is_none());
    assert_eq!(sync.view().len(), 1);

    sync.shutdown().await;
}

#[tokio::test]
async fn clear_with_no_bookmarks_never_touches_the_store() {
    let store = Arc::new(CountingStore::default());
    let sync = spawn(&store);
    sync.ingest_snapshot(&snapshot(&[("btc_krw", "100")], &[]))
        .await
        .unwrap();

    let notice = sync.clear_all_bookmarks().await.unwrap();

    assert_eq!(notice.kind, NoticeKind::NothingToClear);
    assert_eq!(store.clears(), 0);

    sync.shutdown().await;
}

#[tokio::test]
async fn toggle_then_clear_round_trip() {
    let store = Arc::new(CountingStore::default());
    let sync = spawn(&store);
    let mut events = sync.subscribe();
    sync.ingest_snapshot(&snapshot(&[("btc_krw", "100"), ("eth_krw", "50")], &[]))
        .await
        .unwrap();

    let notice = sync.toggle_bookmark("eth_krw").await.unwrap();
    assert_eq!(notice.kind, NoticeKind::BookmarkAdded);
    assert_eq!(store.adds.load(Ordering::SeqCst), 1);
    assert!(sync.view().get("eth_krw").unwrap().bookmark);

    let notice = sync.clear_all_bookmarks().await.unwrap();
    assert_eq!(notice.kind, NoticeKind::BookmarksCleared);
    assert_eq!(store.clears(), 1);
    assert!(sync.view().bookmarked("").is_empty());

    let mut cleared = None;
    while let Ok(event) = events.try_recv() {
        if let TableEvent::BookmarksCleared { symbols } = event {
            cleared = Some(symbols);
        }
    }
    assert_eq!(cleared, Some(vec!["eth_krw".to_string()]));

    assert!(matches!(
        sync.toggle_bookmark("doge_krw").await,
        Err(SyncError::UnknownSymbol(_))
    ));

    sync.shutdown().await;
}

#[tokio::test]
async fn sort_selection_reorders_the_view() {
    let store = Arc::new(CountingStore::default());
    let sync = spawn(&store);
    sync.ingest_snapshot(&snapshot(
        &[("btc_krw", "100"), ("eth_krw", "50"), ("xrp_krw", "75")],
        &[],
    ))
    .await
    .unwrap();

    let order = sync.select_sort(SortKey::ClosePrice).await.unwrap();
    let closes: Vec<String> = sync.view().rows().iter().map(|r| r.data.close.clone()).collect();
    let expected = if order.direction == SortDirection::Descending {
        ["100", "75", "50"]
    } else {
        ["50", "75", "100"]
    };
    assert_eq!(closes, expected);

    let flipped = sync.select_sort(SortKey::ClosePrice).await.unwrap();
    assert_eq!(flipped.direction, order.direction.flipped());

    sync.shutdown().await;
}

#[tokio::test]
async fn engine_loads_snapshot_subscribes_and_applies_stream() {
    let transport = FakeTransport::new();
    let source = Arc::new(StaticSource::new(
        &tickers_body(&[("btc_krw", "100"), ("eth_krw", "50")]),
        &currencies_body(&[("btc", "Bitcoin"), ("eth", "Ethereum")]),
    ));
    let connection = Connection::new(Arc::new(transport.clone()), ConnectionConfig::default());
    let feed = FeedClient::new(source, connection, FeedConfig::default());
    let store = Arc::new(CountingStore::default());
    let sync = spawn(&store);
    let cancel = CancellationToken::new();

    let engine = SyncEngine::start(
        feed,
        sync.clone(),
        EngineSettings {
            stream_url: "wss://ws-api.korbit.co.kr/v2/public".to_string(),
            // One immediate cycle; the next is far beyond the test.
            poll_interval: Duration::from_secs(3600),
        },
        &cancel,
    )
    .await
    .unwrap();

    let mut view = sync.watch();
    timeout(Duration::from_secs(5), view.wait_for(|v| v.is_loaded()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sync.view().len(), 2);

    // Subscription follows the snapshot universe.
    timeout(Duration::from_secs(5), async {
        while transport.sent().is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let sent = transport.sent();
    let subscribe = &sent[0];
    assert!(subscribe.contains("btc_krw") && subscribe.contains("eth_krw"));

    transport.push(&ticker_frame("eth_krw", "55"));
    timeout(
        Duration::from_secs(5),
        view.wait_for(|v| v.get("eth_krw").is_some_and(|r| r.data.close == "55")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(
        sync.view().get("eth_krw").unwrap().full_name.as_deref(),
        Some("Ethereum")
    );

    engine.shutdown().await;
    assert!(sync.view().is_empty());
}
