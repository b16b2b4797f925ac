use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use pulse_data::{
    Symbol,
    candle::{Candle, CandleRequest, HistoricalSource},
    clock::SystemClock,
    config::{FeedConfig, IngestConfig},
    error::DataError,
    feed::{
        FeedMessage, Subscription,
        client::{FeedClient, FeedEvent},
    },
    ingest::{AssetPhase, IngestionController},
    series::{Horizon, SeriesBook},
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = tokio::time::timeout(TIMEOUT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let message = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn next_event<S>(events: &mut S) -> FeedEvent
where
    S: futures_util::Stream<Item = FeedEvent> + Unpin,
{
    tokio::time::timeout(TIMEOUT, events.next())
        .await
        .unwrap()
        .unwrap()
}

fn tick(coin: &str, mark_px: &str) -> Value {
    json!({
        "channel": "activeAssetCtx",
        "data": {
            "coin": coin,
            "ctx": {"markPx": mark_px, "oraclePx": mark_px, "impactPxs": [mark_px, mark_px]}
        }
    })
}

#[tokio::test]
async fn test_feed_client_handshake_and_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let config = FeedConfig::new(url).with_reconnect_delay(Duration::from_millis(50));
    let (feed, mut events) = FeedClient::new(config).start();

    let mut server = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, FeedEvent::Connected);

    feed.subscribe(vec![
        Subscription::asset_ctx("BTC"),
        Subscription::asset_ctx("BTC"),
        Subscription::AllFills,
    ])
    .unwrap();
    assert_eq!(
        next_json(&mut server).await,
        json!({"method": "subscribe", "subscription": {"type": "activeAssetCtx", "coin": "BTC"}})
    );
    assert_eq!(
        next_json(&mut server).await,
        json!({"method": "subscribe", "subscription": {"type": "allFills"}})
    );

    // Application ping answered with a pong
    send_json(&mut server, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut server).await, json!({"type": "pong"}));

    // Acknowledgements are swallowed, ticks forwarded
    send_json(&mut server, json!({"channel": "subscriptionResponse", "data": {}})).await;
    send_json(&mut server, tick("BTC", "100.5")).await;
    let FeedEvent::Message(FeedMessage::AssetCtx(update)) = next_event(&mut events).await else {
        panic!("expected asset ctx update");
    };
    assert_eq!(update.coin, "BTC");
    assert_eq!(update.ctx.mark_px, Some(json!("100.5")));

    // Connection loss then reconnect with fresh subscription bookkeeping
    server.close(None).await.unwrap();
    drop(server);
    assert_eq!(next_event(&mut events).await, FeedEvent::Disconnected);

    let mut server = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, FeedEvent::Connected);
    feed.subscribe(vec![Subscription::asset_ctx("BTC")]).unwrap();
    assert_eq!(
        next_json(&mut server).await,
        json!({"method": "subscribe", "subscription": {"type": "activeAssetCtx", "coin": "BTC"}})
    );
}

struct UniverseSource;

#[async_trait]
impl HistoricalSource for UniverseSource {
    async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, DataError> {
        Ok(vec![
            Candle::new(request.start_time, 90.0),
            Candle::new(request.start_time + 60_000, 95.0),
        ])
    }

    async fn discover_symbols(&self) -> Result<Vec<Symbol>, DataError> {
        Ok(vec![Symbol::new("BTC"), Symbol::new("ETH")])
    }
}

#[tokio::test]
async fn test_ingestion_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (feed, events) = FeedClient::new(FeedConfig::new(url)).start();

    let book = SeriesBook::new();
    let ingest = IngestionController::new(
        IngestConfig::default().with_publish_quiet(Duration::from_millis(20)),
        book.clone(),
        Arc::new(UniverseSource),
        Arc::new(SystemClock),
        Duration::from_secs(1),
    );
    let mut snapshots = ingest.snapshots();
    let fills = ingest.fills();
    tokio::spawn(ingest.run(feed, events));

    // Every discovered symbol plus the fills channel is subscribed on connect
    let mut server = accept(&listener).await;
    let mut subscriptions = Vec::new();
    for _ in 0..3 {
        subscriptions.push(next_json(&mut server).await["subscription"].clone());
    }
    assert_eq!(
        subscriptions,
        vec![
            json!({"type": "activeAssetCtx", "coin": "BTC"}),
            json!({"type": "activeAssetCtx", "coin": "ETH"}),
            json!({"type": "allFills"}),
        ]
    );

    send_json(&mut server, tick("BTC", "100")).await;
    send_json(&mut server, tick("ETH", "not-a-price")).await;
    send_json(
        &mut server,
        json!({
            "type": "allFills",
            "fills": [["0x1234567890abcdef1234567890abcdef12345678", {
                "coin": "BTC", "side": "B", "px": "100", "sz": "0.5",
                "dir": "Open Long", "closedPnl": "0", "hash": "0xabc"
            }]]
        }),
    )
    .await;

    let snapshot = loop {
        tokio::time::timeout(TIMEOUT, snapshots.changed())
            .await
            .unwrap()
            .unwrap();
        let snapshot = snapshots.borrow_and_update().clone();
        let btc_live = snapshot
            .assets
            .iter()
            .any(|asset| asset.symbol == "BTC" && asset.phase == AssetPhase::Live);
        if btc_live && snapshot.fills.total_fills == 1 {
            break snapshot;
        }
    };

    assert_eq!(snapshot.assets[0].symbol, "BTC");
    assert_eq!(snapshot.assets[0].last_price, 100.0);
    assert_eq!(snapshot.assets[0].spread_pct, Some(0.0));
    let eth = snapshot.assets.iter().find(|asset| asset.symbol == "ETH").unwrap();
    assert_eq!(eth.phase, AssetPhase::Seeded);
    assert_eq!(snapshot.fills.total_volume, 50.0);

    let recent = fills.lock().recent(10);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].address, "0x1234...5678");

    // The live sample lands after any backfilled history
    let one_hour = book.read("BTC", Horizon::OneHour, None);
    assert_eq!(one_hour.last(), Some(&100.0));
}
