mod support;

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use tickerdeck::config::StreamConfig;
use tickerdeck::stream::{ConnectionState, PriceSource, PriceUpdate, StreamingFeed};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use support::{WsServer, CLOSED};

const QUIET: Duration = Duration::from_millis(200);

fn feed_for(url: &str) -> StreamingFeed {
    let config = StreamConfig {
        url: url.to_string(),
        connect_timeout_secs: 2,
        ..StreamConfig::default()
    };
    StreamingFeed::new(config, CancellationToken::new())
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn next_update(rx: &mut UnboundedReceiver<PriceUpdate>) -> PriceUpdate {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a price update")
        .expect("feed dropped the listener")
}

async fn wait_for_state(feed: &StreamingFeed, wanted: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while feed.state() != wanted {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("feed never reached {wanted:?}"));
}

#[tokio::test]
async fn start_connects_and_subscribes_full_set() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);

    feed.start(&symbols(&["ethusdt", "BTCUSDT"])).await.expect("start");

    assert_eq!(feed.state(), ConnectionState::Open);
    assert_eq!(feed.subscriptions(), symbols(&["BTCUSDT", "ETHUSDT"]));
    assert_eq!(
        server.next_json().await,
        json!({"op": "subscribe", "args": ["tickers.BTCUSDT", "tickers.ETHUSDT"]})
    );
    assert_eq!(server.connections(), 1);

    feed.stop().await.expect("stop");
}

#[tokio::test]
async fn later_start_subscribes_only_new_symbols_on_same_connection() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);

    feed.start(&symbols(&["BTCUSDT"])).await.expect("start");
    server.next_frame().await;

    feed.start(&symbols(&["BTCUSDT", "ETHUSDT"])).await.expect("extend");
    assert_eq!(
        server.next_json().await,
        json!({"op": "subscribe", "args": ["tickers.ETHUSDT"]})
    );

    feed.start(&symbols(&["ETHUSDT"])).await.expect("no-op");
    server.assert_quiet(QUIET).await;

    assert_eq!(server.connections(), 1);
    assert_eq!(feed.subscriptions(), symbols(&["BTCUSDT", "ETHUSDT"]));

    feed.stop().await.expect("stop");
}

#[tokio::test]
async fn large_sets_are_split_across_frames() {
    let mut server = WsServer::start().await;
    let config = StreamConfig {
        url: server.url.clone(),
        max_args_per_frame: 2,
        ..StreamConfig::default()
    };
    let feed = StreamingFeed::new(config, CancellationToken::new());

    feed.start(&symbols(&["AUSDT", "BUSDT", "CUSDT", "DUSDT", "EUSDT"]))
        .await
        .expect("start");

    let mut topics = Vec::new();
    for _ in 0..3 {
        let frame = server.next_json().await;
        assert_eq!(frame["op"], "subscribe");
        let args = frame["args"].as_array().expect("args").clone();
        assert!(args.len() <= 2);
        topics.extend(args);
    }
    assert_eq!(topics.len(), 5);

    feed.stop().await.expect("stop");
}

#[tokio::test]
async fn ticker_prefers_index_price_and_falls_back_to_last() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);
    let mut prices = feed.subscribe_prices();

    feed.start(&symbols(&["BTCUSDT"])).await.expect("start");
    server.next_frame().await;

    server.send_ticker(
        "BTCUSDT",
        json!({"symbol": "BTCUSDT", "lastPrice": "16550.5", "indexPrice": "16551.2"}),
    );
    let update = next_update(&mut prices).await;
    assert_eq!(update.symbol, "BTCUSDT");
    assert_eq!(update.price, Decimal::from_str("16551.2").unwrap());
    assert_eq!(update.source, PriceSource::Index);

    server.send_ticker("BTCUSDT", json!({"symbol": "BTCUSDT", "lastPrice": "16549.9"}));
    let update = next_update(&mut prices).await;
    assert_eq!(update.price, Decimal::from_str("16549.9").unwrap());
    assert_eq!(update.source, PriceSource::Last);

    feed.stop().await.expect("stop");
}

#[tokio::test]
async fn ticks_without_price_or_for_unknown_symbols_are_dropped() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);
    let mut prices = feed.subscribe_prices();

    feed.start(&symbols(&["BTCUSDT"])).await.expect("start");
    server.next_frame().await;

    server.send_ticker("SOLUSDT", json!({"lastPrice": "20"}));
    server.send_ticker("BTCUSDT", json!({"fundingRate": "0.0001"}));
    server.send_text("definitely not json");
    server.send_ticker("BTCUSDT", json!({"lastPrice": "16000"}));

    let update = next_update(&mut prices).await;
    assert_eq!(update.symbol, "BTCUSDT");
    assert_eq!(update.price, Decimal::from_str("16000").unwrap());
    assert_eq!(feed.state(), ConnectionState::Open);

    feed.stop().await.expect("stop");
}

#[tokio::test]
async fn ping_is_answered_with_exactly_one_pong() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);
    let mut prices = feed.subscribe_prices();

    feed.start(&symbols(&["BTCUSDT"])).await.expect("start");
    server.next_frame().await;

    server.send_text(r#"{"op":"ping"}"#);
    server.send_ticker("BTCUSDT", json!({"lastPrice": "1"}));

    assert_eq!(server.next_json().await, json!({"op": "pong"}));
    next_update(&mut prices).await;
    server.assert_quiet(QUIET).await;

    feed.stop().await.expect("stop");
}

#[tokio::test]
async fn unsubscribed_symbols_stop_producing_updates() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);
    let mut prices = feed.subscribe_prices();

    feed.start(&symbols(&["BTCUSDT", "ETHUSDT"])).await.expect("start");
    server.next_frame().await;

    feed.unsubscribe(&symbols(&["BTCUSDT"])).await.expect("unsubscribe");
    assert_eq!(
        server.next_json().await,
        json!({"op": "unsubscribe", "args": ["tickers.BTCUSDT"]})
    );
    assert_eq!(feed.subscriptions(), symbols(&["ETHUSDT"]));

    server.send_ticker("BTCUSDT", json!({"lastPrice": "16000"}));
    server.send_ticker("ETHUSDT", json!({"lastPrice": "1200"}));

    let update = next_update(&mut prices).await;
    assert_eq!(update.symbol, "ETHUSDT");

    feed.stop().await.expect("stop");
}

#[tokio::test]
async fn unsubscribe_while_disconnected_only_edits_the_set() {
    let feed = feed_for("ws://127.0.0.1:9");
    feed.unsubscribe(&symbols(&["BTCUSDT"])).await.expect("no-op");
    assert!(feed.subscriptions().is_empty());
    assert_eq!(feed.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn stop_is_idempotent_and_closes_the_socket() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);

    feed.stop().await.expect("stop before start");

    feed.start(&symbols(&["BTCUSDT"])).await.expect("start");
    server.next_frame().await;

    feed.stop().await.expect("first stop");
    assert_eq!(feed.state(), ConnectionState::Disconnected);
    assert!(feed.subscriptions().is_empty());
    assert_eq!(server.next_frame().await, CLOSED);

    feed.stop().await.expect("second stop");
    assert_eq!(feed.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn restart_after_stop_opens_a_new_connection() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);

    feed.start(&symbols(&["BTCUSDT"])).await.expect("start");
    server.next_frame().await;
    feed.stop().await.expect("stop");
    assert_eq!(server.next_frame().await, CLOSED);

    feed.start(&symbols(&["SOLUSDT"])).await.expect("restart");
    assert_eq!(
        server.next_json().await,
        json!({"op": "subscribe", "args": ["tickers.SOLUSDT"]})
    );
    assert_eq!(server.connections(), 2);

    feed.stop().await.expect("stop");
}

#[tokio::test]
async fn remote_close_drops_back_to_disconnected() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);

    feed.start(&symbols(&["BTCUSDT"])).await.expect("start");
    server.next_frame().await;

    server.send_close();
    wait_for_state(&feed, ConnectionState::Disconnected).await;
    assert!(feed.subscriptions().is_empty());

    feed.stop().await.expect("stop after remote close");
}

#[tokio::test]
async fn connect_failure_leaves_feed_disconnected() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let feed = feed_for(&format!("ws://{}", addr));
    let err = feed
        .start(&symbols(&["BTCUSDT"]))
        .await
        .expect_err("nothing is listening");

    assert!(err.is_transport());
    assert_eq!(feed.state(), ConnectionState::Disconnected);
    assert!(feed.subscriptions().is_empty());
}

#[tokio::test]
async fn empty_start_is_a_no_op() {
    let feed = feed_for("ws://127.0.0.1:9");
    feed.start(&[]).await.expect("nothing to do");
    assert_eq!(feed.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn dated_contract_symbols_keep_their_separator() {
    let mut server = WsServer::start().await;
    let feed = feed_for(&server.url);
    let mut prices = feed.subscribe_prices();

    feed.start(&symbols(&[" btc-27dec24 "])).await.expect("start");
    assert_eq!(
        server.next_json().await,
        json!({"op": "subscribe", "args": ["tickers.BTC-27DEC24"]})
    );
    assert_eq!(feed.subscriptions(), symbols(&["BTC-27DEC24"]));

    server.send_ticker("BTC-27DEC24", json!({"lastPrice": "70125.5"}));
    let update = next_update(&mut prices).await;
    assert_eq!(update.symbol, "BTC-27DEC24");
    assert_eq!(update.price, Decimal::from_str("70125.5").unwrap());

    feed.unsubscribe(&symbols(&["BTC-27DEC24"])).await.expect("unsubscribe");
    assert_eq!(
        server.next_json().await,
        json!({"op": "unsubscribe", "args": ["tickers.BTC-27DEC24"]})
    );

    feed.stop().await.expect("stop");
}

#[tokio::test]
async fn blank_symbols_are_rejected_before_connecting() {
    let server = WsServer::start().await;
    let feed = feed_for(&server.url);

    feed.start(&symbols(&["BTCUSDT", "   "]))
        .await
        .expect_err("blank symbol");
    assert_eq!(feed.state(), ConnectionState::Disconnected);
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn start_joining_a_pending_connect_shares_its_failure() {
    // Accepts TCP but never answers the websocket handshake.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = StreamConfig {
        url: format!("ws://{}", addr),
        connect_timeout_secs: 1,
        ..StreamConfig::default()
    };
    let feed = StreamingFeed::new(config, CancellationToken::new());

    let first = tokio::spawn({
        let feed = feed.clone();
        async move { feed.start(&symbols(&["BTCUSDT"])).await }
    });
    wait_for_state(&feed, ConnectionState::Connecting).await;

    let second = feed.start(&symbols(&["ETHUSDT"])).await;
    assert!(second.is_err(), "joined start must report the failed connect");

    let first = first.await.expect("join");
    assert!(first.is_err());
    assert_eq!(feed.state(), ConnectionState::Disconnected);
    assert!(feed.subscriptions().is_empty());

    silent.abort();
}
