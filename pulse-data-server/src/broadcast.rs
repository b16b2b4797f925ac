use chrono::Utc;
use futures::{SinkExt, StreamExt};
use pulse_data::ingest::AssetSnapshot;
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, watch},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Frame pushed to every WebSocket client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Welcome {
        message: &'static str,
        timestamp: chrono::DateTime<Utc>,
    },
    Snapshot {
        data: &'a AssetSnapshot,
    },
}

/// Relay every published snapshot from the ingestion controller onto the broadcast channel.
pub async fn forward_snapshots(
    mut snapshots: watch::Receiver<Arc<AssetSnapshot>>,
    tx: broadcast::Sender<Arc<AssetSnapshot>>,
) {
    while snapshots.changed().await.is_ok() {
        let snapshot = Arc::clone(&snapshots.borrow_and_update());
        // Zero connected clients is not an error
        let _ = tx.send(snapshot);
    }

    info!("snapshot publisher stopped, no more broadcasts");
}

/// Bind `addr` and broadcast snapshots to every client that connects.
pub async fn start_websocket_server(
    addr: SocketAddr,
    tx: broadcast::Sender<Arc<AssetSnapshot>>,
    latest: watch::Receiver<Arc<AssetSnapshot>>,
) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%addr, %error, "failed to bind WebSocket server");
            return;
        }
    };

    info!(%addr, "WebSocket server listening");
    serve(listener, tx, latest).await;
}

pub async fn serve(
    listener: TcpListener,
    tx: broadcast::Sender<Arc<AssetSnapshot>>,
    latest: watch::Receiver<Arc<AssetSnapshot>>,
) {
    while let Ok((stream, peer_addr)) = listener.accept().await {
        debug!(%peer_addr, "new WebSocket connection");
        tokio::spawn(handle_client(stream, peer_addr, tx.subscribe(), latest.clone()));
    }
}

/// Greet the client with the latest snapshot, then push every broadcast snapshot until either
/// side goes away.
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    mut rx: broadcast::Receiver<Arc<AssetSnapshot>>,
    latest: watch::Receiver<Arc<AssetSnapshot>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            error!(%peer_addr, %error, "WebSocket handshake failed");
            return;
        }
    };

    info!(%peer_addr, "WebSocket client connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = ClientFrame::Welcome {
        message: "Connected to pulse asset feed",
        timestamp: Utc::now(),
    };
    let current = Arc::clone(&latest.borrow());
    for frame in [welcome, ClientFrame::Snapshot { data: &current }] {
        if let Ok(text) = serde_json::to_string(&frame) {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    let frame = ClientFrame::Snapshot { data: &snapshot };
                    let Ok(text) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Snapshots are full state, the next one catches the client up
                    warn!(%peer_addr, skipped, "client lagged behind snapshot broadcast");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!(%peer_addr, "snapshot broadcast closed");
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => {
                    debug!(%peer_addr, text = text.as_str(), "ignoring client text frame");
                }
                Err(error) => {
                    warn!(%peer_addr, %error, "WebSocket client error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(%peer_addr, "WebSocket client disconnected");
}
