use super::{FeedMessage, PONG_FRAME, Subscription, timeout::TimeoutStream};
use crate::{config::FeedConfig, error::DataError};
use fnv::FnvHashSet;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Event surfaced by the [`FeedClient`] to its consumer.
#[derive(Clone, PartialEq, Debug)]
pub enum FeedEvent {
    /// A new connection is open. Subscriptions from previous connections are gone.
    Connected,
    /// The current connection ended, a reconnect is scheduled.
    Disconnected,
    Message(FeedMessage),
}

/// Command sent to the running [`FeedClient`].
#[derive(Clone, PartialEq, Debug)]
pub enum FeedCommand {
    Subscribe(Vec<Subscription>),
}

/// Handle used to steer a running [`FeedClient`]. Dropping every handle stops the client.
#[derive(Clone, Debug)]
pub struct FeedHandle {
    command_tx: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedHandle {
    /// Handle driving whatever consumes `command_tx`'s receiver, eg/ a test harness.
    pub fn from_sender(command_tx: mpsc::UnboundedSender<FeedCommand>) -> Self {
        Self { command_tx }
    }

    /// Request subscriptions on the current connection. Subscriptions already sent on this
    /// connection are skipped.
    pub fn subscribe(&self, subscriptions: Vec<Subscription>) -> Result<(), DataError> {
        if subscriptions.is_empty() {
            return Ok(());
        }

        self.command_tx
            .send(FeedCommand::Subscribe(subscriptions))
            .map_err(|_| DataError::Transport("feed client stopped".to_string()))
    }
}

/// Reconnecting WebSocket client for the live feed.
///
/// The connection loop answers application pings, sends periodic protocol pings, enforces an
/// idle read timeout and reconnects after `reconnect_delay` whenever the connection is lost.
#[derive(Debug, Clone)]
pub struct FeedClient {
    config: FeedConfig,
}

impl FeedClient {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    /// Spawn the connection loop, returning a command handle and the event stream.
    pub fn start(self) -> (FeedHandle, ReceiverStream<FeedEvent>) {
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_buffer_size.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_feed_loop(self.config, event_tx, command_rx));

        (FeedHandle { command_tx }, ReceiverStream::new(event_rx))
    }
}

/// Why a single connection ended.
enum ConnectionEnd {
    /// Lost, reconnect after the configured delay.
    Lost,
    /// The consumer or every handle is gone, stop the client.
    Shutdown,
}

async fn run_feed_loop(
    config: FeedConfig,
    event_tx: mpsc::Sender<FeedEvent>,
    mut command_rx: mpsc::UnboundedReceiver<FeedCommand>,
) {
    let url = match config.connect_url() {
        Ok(url) => url,
        Err(error) => {
            error!(%error, url = %config.url, "invalid feed url, feed client not started");
            return;
        }
    };

    info!(url = %config.url, "starting feed client");

    loop {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!(url = %config.url, "connected to feed");
                if event_tx.send(FeedEvent::Connected).await.is_err() {
                    return;
                }

                let end = run_connection(&config, ws_stream, &event_tx, &mut command_rx).await;

                if event_tx.send(FeedEvent::Disconnected).await.is_err() {
                    return;
                }
                if let ConnectionEnd::Shutdown = end {
                    info!("feed consumer gone, stopping feed client");
                    return;
                }
                warn!("feed connection lost, will reconnect");
            }
            Err(error) => {
                error!(%error, url = %config.url, "failed to connect to feed");
            }
        }

        debug!(delay = ?config.reconnect_delay, "waiting before reconnecting to feed");
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn run_connection<S>(
    config: &FeedConfig,
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    event_tx: &mpsc::Sender<FeedEvent>,
    command_rx: &mut mpsc::UnboundedReceiver<FeedCommand>,
) -> ConnectionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, read) = ws_stream.split();
    let mut read = TimeoutStream::new(read, config.read_timeout);

    // Subscriptions sent on this connection only
    let mut subscribed = FnvHashSet::<Subscription>::default();

    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + config.ping_interval,
        config.ping_interval,
    );

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!("failed to send ping, connection likely dead");
                    return ConnectionEnd::Lost;
                }
            }
            command = command_rx.recv() => {
                let Some(FeedCommand::Subscribe(subscriptions)) = command else {
                    return ConnectionEnd::Shutdown;
                };

                for subscription in subscriptions {
                    if subscribed.contains(&subscription) {
                        continue;
                    }

                    let frame = match subscription.to_frame() {
                        Ok(frame) => frame,
                        Err(error) => {
                            warn!(%error, ?subscription, "failed to encode subscription");
                            continue;
                        }
                    };

                    if let Err(error) = write.send(Message::Text(frame.into())).await {
                        warn!(%error, "failed to send subscription");
                        return ConnectionEnd::Lost;
                    }
                    subscribed.insert(subscription);
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => match FeedMessage::parse(text.as_str()) {
                        Ok(FeedMessage::Ping) => {
                            if write.send(Message::Text(PONG_FRAME.into())).await.is_err() {
                                return ConnectionEnd::Lost;
                            }
                        }
                        Ok(FeedMessage::Ignore) => {}
                        Ok(message) => {
                            if event_tx.send(FeedEvent::Message(message)).await.is_err() {
                                return ConnectionEnd::Shutdown;
                            }
                        }
                        Err(error) => {
                            debug!(%error, "dropping undecodable feed frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "feed closed connection");
                        return ConnectionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) if error.is_terminal() => {
                        warn!(%error, "terminal feed error");
                        return ConnectionEnd::Lost;
                    }
                    Some(Err(error)) => {
                        warn!(%error, "feed error");
                    }
                    None => return ConnectionEnd::Lost,
                }
            }
        }
    }
}
