//! Live ingestion.
//!
//! The [`IngestionController`] is the single consumer of the feed's event stream. For every
//! `activeAssetCtx` tick it updates the symbol's [`LiveAssetState`], passes the price through
//! the [`SamplingGate`] into the [`SeriesBook`] and re-arms the publish [`QuietPeriod`]. Fills
//! go to the shared [`FillTape`]. On the first connection it starts a [`Backfill`] task.

use crate::{
    Symbol,
    candle::HistoricalSource,
    clock::Clock,
    config::IngestConfig,
    error::DataError,
    feed::{
        AssetCtxUpdate, RawFill, Subscription,
        client::{FeedEvent, FeedHandle},
        FeedMessage,
    },
    series::SeriesBook,
};
use fnv::FnvHashMap;
use futures::{Stream, StreamExt};
use indexmap::IndexSet;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use backfill::{Backfill, BackfillReport};
pub use fills::{Fill, FillStats, FillTape, SharedFillTape};
pub use gate::SamplingGate;
pub use publish::{AssetSnapshot, QuietPeriod, SortCriterion};
pub use state::{AssetPhase, LiveAssetState, ParsedTick};

/// Historical candle backfill of live horizon stores.
pub mod backfill;

/// Bounded fills tape and its running statistics.
pub mod fills;

/// Per-symbol sampling gate.
pub mod gate;

/// Snapshot ordering and the publish debounce timer.
pub mod publish;

/// Per-symbol live market state and tick decoding.
pub mod state;

/// Consumes live feed events and maintains every live structure derived from them.
pub struct IngestionController {
    config: IngestConfig,
    clock: Arc<dyn Clock>,
    source: Arc<dyn HistoricalSource>,
    book: SeriesBook,
    backfill: Backfill,
    backfill_started: bool,
    tracked: IndexSet<Symbol>,
    assets: FnvHashMap<Symbol, LiveAssetState>,
    gate: SamplingGate,
    fills: SharedFillTape,
    quiet: QuietPeriod,
    snapshot_tx: watch::Sender<Arc<AssetSnapshot>>,
}

impl std::fmt::Debug for IngestionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionController")
            .field("tracked", &self.tracked.len())
            .field("assets", &self.assets.len())
            .field("backfill_started", &self.backfill_started)
            .finish_non_exhaustive()
    }
}

impl IngestionController {
    pub fn new(
        config: IngestConfig,
        book: SeriesBook,
        source: Arc<dyn HistoricalSource>,
        clock: Arc<dyn Clock>,
        fetch_timeout: Duration,
    ) -> Self {
        let backfill = Backfill::new(
            Arc::clone(&source),
            book.clone(),
            Arc::clone(&clock),
            config.backfill_ranges,
            config.backfill_batch_size,
            fetch_timeout,
        );
        let fills = FillTape::shared(config.fills_capacity, clock.now_ms());
        let (snapshot_tx, _) = watch::channel(Arc::new(AssetSnapshot::default()));

        Self {
            gate: SamplingGate::new(config.sample_interval),
            quiet: QuietPeriod::new(config.publish_quiet),
            config,
            clock,
            source,
            book,
            backfill,
            backfill_started: false,
            tracked: IndexSet::new(),
            assets: FnvHashMap::default(),
            fills,
            snapshot_tx,
        }
    }

    /// Receiver of every published [`AssetSnapshot`].
    pub fn snapshots(&self) -> watch::Receiver<Arc<AssetSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn fills(&self) -> SharedFillTape {
        Arc::clone(&self.fills)
    }

    pub fn book(&self) -> &SeriesBook {
        &self.book
    }

    pub fn asset(&self, symbol: &str) -> Option<&LiveAssetState> {
        self.assets.get(symbol)
    }

    /// Tracked symbols in discovery order.
    pub fn tracked(&self) -> impl Iterator<Item = &Symbol> {
        self.tracked.iter()
    }

    /// Track `symbols`, creating a zero-price placeholder state for each new one.
    pub fn seed_symbols<I>(&mut self, symbols: I)
    where
        I: IntoIterator<Item = Symbol>,
    {
        let now = self.clock.now_ms();
        for symbol in symbols {
            if symbol.is_empty() {
                continue;
            }
            self.assets
                .entry(symbol.clone())
                .or_insert_with(|| LiveAssetState::seeded(symbol.clone(), now));
            self.tracked.insert(symbol);
        }
    }

    /// Discover the tradable universe, retrying after `discovery_retry` until it succeeds.
    /// Configured extra symbols are appended to the discovered ones.
    pub async fn discover(&mut self) {
        loop {
            match self.source.discover_symbols().await {
                Ok(symbols) => {
                    let discovered = symbols.len();
                    self.seed_symbols(symbols);
                    self.seed_symbols(self.config.extra_symbols.clone());
                    info!(discovered, tracked = self.tracked.len(), "discovered assets");
                    return;
                }
                Err(error) => {
                    warn!(%error, retry = ?self.config.discovery_retry, "asset discovery failed");
                    tokio::time::sleep(self.config.discovery_retry).await;
                }
            }
        }
    }

    /// Apply one `activeAssetCtx` tick.
    ///
    /// A tick with a malformed or non-finite field is rejected without touching any state.
    /// Otherwise the live state is always updated, while the price only becomes a series
    /// sample if it is positive and the [`SamplingGate`] admits it.
    pub fn on_tick(&mut self, update: &AssetCtxUpdate) -> Result<(), DataError> {
        let tick = ParsedTick::parse(&update.ctx)?;
        let now = self.clock.now_ms();

        if !self.tracked.contains(&update.coin) {
            self.tracked.insert(update.coin.clone());
        }
        let state = self
            .assets
            .entry(update.coin.clone())
            .or_insert_with(|| LiveAssetState::seeded(update.coin.clone(), now));
        state.apply(&tick, now);

        let price = state.last_price;
        if price > 0.0 && self.gate.admit(&update.coin, now) {
            self.book.append(&update.coin, now, price);
        }

        self.quiet.rearm();
        Ok(())
    }

    /// Record a batch of fills on the tape.
    pub fn on_fills(&mut self, fills: Vec<(String, RawFill)>) -> usize {
        let now = self.clock.now_ms();
        self.fills.lock().record(fills, now)
    }

    /// Subscribe every tracked symbol plus the fills channel on a fresh connection, and start
    /// the backfill the first time this happens.
    pub fn on_connected(&mut self, feed: &FeedHandle) -> Result<(), DataError> {
        let subscriptions = self
            .tracked
            .iter()
            .cloned()
            .map(Subscription::asset_ctx)
            .chain(std::iter::once(Subscription::AllFills))
            .collect::<Vec<_>>();

        info!(subscriptions = subscriptions.len(), "subscribing on new feed connection");
        feed.subscribe(subscriptions)?;

        if !self.backfill_started && !self.tracked.is_empty() {
            self.backfill_started = true;
            let backfill = self.backfill.clone();
            let symbols = self.tracked.iter().cloned().collect::<Vec<_>>();
            tokio::spawn(async move { backfill.run(&symbols).await });
        }

        Ok(())
    }

    /// Build the current [`AssetSnapshot`], sorted by the configured criterion.
    pub fn snapshot(&self) -> AssetSnapshot {
        let mut assets = self.assets.values().cloned().collect::<Vec<_>>();
        self.config.sort.sort(&mut assets);

        AssetSnapshot {
            assets,
            fills: self.fills.lock().stats(),
            generated_at: self.clock.now_ms(),
        }
    }

    /// Hand the current snapshot to every consumer.
    pub fn publish(&mut self) {
        self.quiet.disarm();
        let snapshot = self.snapshot();
        debug!(assets = snapshot.assets.len(), "publishing asset snapshot");
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }

    /// Drive the controller until the feed event stream ends.
    ///
    /// Discovery runs first, so the first `Connected` event already subscribes the whole
    /// universe.
    pub async fn run<S>(mut self, feed: FeedHandle, mut events: S)
    where
        S: Stream<Item = FeedEvent> + Unpin,
    {
        self.discover().await;
        self.publish();

        loop {
            let deadline = self.quiet.deadline();

            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        info!("feed event stream ended, stopping ingestion");
                        break;
                    };
                    self.on_event(&feed, event);
                }
                _ = publish::wait_for(deadline) => {
                    self.publish();
                }
            }
        }

        // Flush whatever arrived since the last publish
        if self.quiet.is_armed() {
            self.publish();
        }
    }

    fn on_event(&mut self, feed: &FeedHandle, event: FeedEvent) {
        match event {
            FeedEvent::Connected => {
                if let Err(error) = self.on_connected(feed) {
                    warn!(%error, "failed to subscribe on new connection");
                }
            }
            FeedEvent::Disconnected => {
                info!("feed disconnected, series and live state retained");
            }
            FeedEvent::Message(FeedMessage::AssetCtx(update)) => {
                if let Err(error) = self.on_tick(&update) {
                    debug!(coin = %update.coin, %error, "dropping malformed tick");
                }
            }
            FeedEvent::Message(FeedMessage::AllFills(fills)) => {
                self.on_fills(fills);
            }
            FeedEvent::Message(FeedMessage::Ping | FeedMessage::Ignore) => {}
        }
    }
}
