//! End-to-end flow: broker → session → router → cache → hub → clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use market_gateway::application::ports::{ChangePublisher, UpstreamPort};
use market_gateway::infrastructure::broadcast::BroadcastConfig;
use market_gateway::{
    AssetSelector, BroadcastHub, Credentials, GatewayState, HttpServer, MarketCache,
    MarketEventRouter, RequestPlan, SelectionPolicy, SessionHandle, SharedBroadcastHub,
    SharedMarketCache, SharedSelection, SubscribeMode, UpstreamSession, UpstreamSessionConfig,
    dispatch_session_events,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use common::{FakeBroker, STEP};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Gateway {
    cache: SharedMarketCache,
    selection: SharedSelection,
    hub: SharedBroadcastHub,
    handle: SessionHandle,
    cancel: CancellationToken,
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn start_gateway(broker: &FakeBroker, credentials: Credentials) -> Gateway {
    let cancel = CancellationToken::new();
    let cache = MarketCache::shared();
    let selection: SharedSelection = Arc::new(parking_lot::RwLock::new(Vec::new()));
    let hub = Arc::new(BroadcastHub::new(BroadcastConfig::default()));

    let mut config = UpstreamSessionConfig::new(broker.url(), credentials);
    config.settle_delay = Duration::from_millis(20);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (session, handle) = UpstreamSession::new(config, event_tx, cancel.clone());

    let upstream: Arc<dyn UpstreamPort> = Arc::new(handle.clone());
    let publisher: Arc<dyn ChangePublisher> = Arc::clone(&hub) as Arc<dyn ChangePublisher>;
    let router = MarketEventRouter::new(
        Arc::clone(&cache),
        Arc::clone(&selection),
        AssetSelector::new(SelectionPolicy::AllowList {
            symbols: vec!["EURUSD_otc".into(), "GBPUSD_otc".into()],
        }),
        RequestPlan {
            subscribe: SubscribeMode::Subscribe,
            max_jitter: Duration::ZERO,
            ..RequestPlan::default()
        },
        upstream,
        publisher,
    );

    tokio::spawn(async move { dispatch_session_events(event_rx, &router).await });
    tokio::spawn(session.run());

    Gateway {
        cache,
        selection,
        hub,
        handle,
        cancel,
    }
}

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(STEP, client.next())
            .await
            .expect("gateway should send a message")
            .expect("socket should stay open")
            .unwrap();
        if let Message::Text(text) = message {
            return parse(text.as_str());
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(STEP, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should become true");
}

#[tokio::test]
async fn asset_list_drives_requests_and_updates_reach_subscribers() {
    let broker = FakeBroker::bind().await;
    let gateway = start_gateway(&broker, Credentials::None);

    let mut conn = broker.accept().await;
    assert_eq!(conn.recv_event().await.0, "assets_status");

    let mut sub = gateway.hub.subscribe(&gateway.cache, gateway.handle.state().is_live());
    let snapshot = parse(&sub.receiver.recv().await.unwrap());
    assert_eq!(snapshot["type"], "snapshot");

    conn.send_event(
        "assets_status",
        &json!([
            {"symbol": "EURUSD_otc", "enabled": true, "payout": 92},
            {"symbol": "AUDUSD_otc", "enabled": true, "payout": 90},
            {"symbol": "GBPUSD_otc", "enabled": false, "payout": 88},
            {"bogus": true}
        ]),
    )
    .await;

    let requests = conn.recv_events(2).await;
    assert_eq!(
        requests,
        vec![
            (
                "candles".to_string(),
                json!({"asset": "EURUSD_otc", "tf": 60, "cnt": 50})
            ),
            ("subscribe".to_string(), json!({"asset": "EURUSD_otc"})),
        ]
    );
    assert_eq!(gateway.selection.read().len(), 1);

    conn.send_event(
        "candles",
        &json!([
            {"asset": "EURUSD_otc", "time": 1_700_000_000, "open": 1.0, "high": 1.2, "low": 0.9, "close": 1.1},
            {"asset": "EURUSD_otc", "time": 1_700_000_060, "open": 1.1, "high": 1.3, "low": 1.0, "close": 1.2}
        ]),
    )
    .await;
    conn.send_event("tick", &json!({"asset": "EURUSD_otc", "value": 1.25}))
        .await;

    let candles = parse(&tokio::time::timeout(STEP, sub.receiver.recv()).await.unwrap().unwrap());
    assert_eq!(candles["type"], "candles");
    assert_eq!(candles["asset"], "EURUSD_otc");
    assert_eq!(candles["data"].as_array().unwrap().len(), 2);
    assert_eq!(candles["price"], 1.2);

    let tick = parse(&tokio::time::timeout(STEP, sub.receiver.recv()).await.unwrap().unwrap());
    assert_eq!(tick["type"], "tick");
    assert_eq!(tick["price"], 1.25);
    assert!(tick["timestamp"].as_i64().unwrap() > 0);

    let cache = gateway.cache.read();
    assert_eq!(cache.price("EURUSD_otc"), Some(1.25));
    assert_eq!(cache.candles("EURUSD_otc").unwrap().len(), 2);
}

#[tokio::test]
async fn balance_is_cached_after_login() {
    let broker = FakeBroker::bind().await;
    let gateway = start_gateway(&broker, Credentials::session_token("abc").unwrap());

    let mut conn = broker.accept().await;
    let names: Vec<String> = conn.recv_events(2).await.into_iter().map(|e| e.0).collect();
    assert_eq!(names, vec!["assets_status", "balance_get"]);

    conn.send_event("balance", &json!({"balance": 1000.5, "currency": "USD"}))
        .await;

    wait_until(|| gateway.cache.read().balance().is_some()).await;
    assert_eq!(
        gateway.cache.read().balance(),
        Some(&json!({"balance": 1000.5, "currency": "USD"}))
    );
}

#[tokio::test]
async fn downstream_websocket_gets_snapshot_updates_and_candle_replies() {
    let broker = FakeBroker::bind().await;
    let gateway = start_gateway(&broker, Credentials::None);
    let mut conn = broker.accept().await;
    assert_eq!(conn.recv_event().await.0, "assets_status");

    gateway.cache.write().apply_tick("GBPUSD_otc", 1.27);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(GatewayState::new(
        "test".into(),
        Arc::clone(&gateway.cache),
        Arc::clone(&gateway.selection),
        Arc::clone(&gateway.hub),
        gateway.handle.clone(),
    ));
    let server = HttpServer::new(0, state, gateway.cancel.clone());
    tokio::spawn(server.serve(listener));

    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    let snapshot = next_json(&mut client).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["prices"], json!({"GBPUSD_otc": 1.27}));
    assert_eq!(snapshot["connected"], true);
    assert_eq!(snapshot["balance"], Value::Null);
    wait_until(|| gateway.hub.subscriber_count() == 1).await;

    conn.send_event("tick", &json!({"asset": "EURUSD_otc", "value": 1.08}))
        .await;
    let tick = next_json(&mut client).await;
    assert_eq!(tick["type"], "tick");
    assert_eq!(tick["asset"], "EURUSD_otc");

    client
        .send(Message::text("definitely not json"))
        .await
        .unwrap();
    client
        .send(Message::text(r#"{"type":"get_candles","asset":"EURUSD_otc"}"#))
        .await
        .unwrap();

    let reply = next_json(&mut client).await;
    assert_eq!(
        reply,
        json!({"type": "candles", "asset": "EURUSD_otc", "data": null})
    );

    client.close(None).await.unwrap();
    wait_until(|| gateway.hub.subscriber_count() == 0).await;
}

#[tokio::test]
async fn http_config_reconnects_with_new_token() {
    let broker = FakeBroker::bind().await;
    let gateway = start_gateway(&broker, Credentials::session_token("old").unwrap());
    let mut conn = broker.accept().await;
    assert_eq!(conn.cookie.as_deref(), Some("ssid=old"));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(GatewayState::new(
        "test".into(),
        Arc::clone(&gateway.cache),
        Arc::clone(&gateway.selection),
        Arc::clone(&gateway.hub),
        gateway.handle.clone(),
    ));
    tokio::spawn(HttpServer::new(0, state, gateway.cancel.clone()).serve(listener));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let body = r#"{"ssid":"new"}"#;
    let request = format!(
        "POST /config HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("SSID recebido. Reconectando..."));

    conn.expect_closed().await;
    let conn = broker.accept().await;
    assert_eq!(conn.cookie.as_deref(), Some("ssid=new"));
}
