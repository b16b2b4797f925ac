//! Server-side freshness cache.
//!
//! [`ChartCache`] answers `(symbols, horizon)` queries from fetched candle series. Entries
//! younger than the TTL are served as-is. Stale entries are served immediately and refreshed
//! in the background (stale-while-revalidate), while missing entries are fetched inline in
//! bounded-concurrency batches. A symbol whose fetch fails falls back to its previous entry,
//! or to an empty series, without affecting the rest of the query.

use crate::{
    Symbol,
    candle::{CandleRequest, HistoricalSource},
    clock::Clock,
    config::CacheConfig,
    error::DataError,
    series::Horizon,
};
use fnv::FnvHashMap;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use indexmap::IndexMap;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

pub use entry::{CacheEntry, CacheKey, sanitize};

/// Immutable cache entries and series sanitisation.
pub mod entry;

/// Upstream refresh shared by every caller interested in the same key.
type RefreshFlight = Shared<BoxFuture<'static, Result<Arc<CacheEntry>, DataError>>>;

/// Freshness-gated `(symbol, horizon) -> series` cache in front of a [`HistoricalSource`].
///
/// Cheap to clone, every clone shares the same entries.
#[derive(Clone)]
pub struct ChartCache {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn HistoricalSource>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    entries: RwLock<FnvHashMap<CacheKey, Arc<CacheEntry>>>,
    in_flight: Mutex<FnvHashMap<CacheKey, RefreshFlight>>,
}

impl std::fmt::Debug for ChartCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartCache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.entries.read().len())
            .field("in_flight", &self.inner.in_flight.lock().len())
            .finish()
    }
}

impl ChartCache {
    pub fn new(
        source: Arc<dyn HistoricalSource>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                config,
                entries: RwLock::new(FnvHashMap::default()),
                in_flight: Mutex::new(FnvHashMap::default()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Series of every requested symbol for `horizon`, in request order.
    ///
    /// Blank symbols are dropped and duplicates collapsed. The result contains every remaining
    /// symbol, with an empty series for symbols that never fetched successfully. Only a symbol
    /// list without any usable symbol is an error.
    pub async fn query<I>(
        &self,
        symbols: I,
        horizon: Horizon,
    ) -> Result<IndexMap<Symbol, Vec<f64>>, DataError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let symbols = normalize_symbols(symbols)?;
        let now = self.inner.clock.now_ms();
        let ttl = duration_ms(self.inner.config.ttl);
        let revalidate_in_background = self.inner.config.stale_while_revalidate;

        let mut result = IndexMap::with_capacity(symbols.len());
        let mut inline = Vec::new();
        let mut background = Vec::new();

        {
            let entries = self.inner.entries.read();
            for symbol in symbols {
                match entries.get(&(symbol.clone(), horizon)) {
                    Some(entry) if entry.is_fresh(now, ttl) => {
                        result.insert(symbol, entry.series.clone());
                    }
                    Some(entry) if revalidate_in_background => {
                        result.insert(symbol.clone(), entry.series.clone());
                        background.push(symbol);
                    }
                    _ => {
                        // Placeholder keeps the symbol's position in the response
                        result.insert(symbol.clone(), Vec::new());
                        inline.push(symbol);
                    }
                }
            }
        }

        debug!(
            %horizon,
            fresh = result.len() - inline.len() - background.len(),
            stale = background.len(),
            inline = inline.len(),
            "chart cache query"
        );

        if !background.is_empty() {
            let cache = self.clone();
            tokio::spawn(async move {
                cache.refresh(&background, horizon).await;
            });
        }

        for (symbol, series) in self.refresh(&inline, horizon).await {
            result.insert(symbol, series);
        }

        Ok(result)
    }

    /// Refresh `symbols` in sequential batches of `batch_size` concurrent fetches.
    ///
    /// Returns the refreshed series of every symbol, or its fallback when the fetch failed.
    pub async fn refresh(&self, symbols: &[Symbol], horizon: Horizon) -> Vec<(Symbol, Vec<f64>)> {
        if symbols.is_empty() {
            return Vec::new();
        }

        let mut refreshed = Vec::with_capacity(symbols.len());
        let mut failed = 0;

        for batch in symbols.chunks(self.inner.config.batch_size.max(1)) {
            let fetches = batch.iter().map(|symbol| async move {
                match self.refresh_one(symbol.clone(), horizon).await {
                    Ok(entry) => (symbol.clone(), Ok(entry.series.clone())),
                    Err(error) => (symbol.clone(), Err(error)),
                }
            });

            for (symbol, outcome) in join_all(fetches).await {
                let series = outcome.unwrap_or_else(|error| {
                    failed += 1;
                    if error.is_upstream_rejection() {
                        warn!(%symbol, %horizon, %error, "upstream rejected chart fetch");
                    } else {
                        warn!(%symbol, %horizon, %error, "chart fetch failed, serving fallback");
                    }
                    self.fallback(&symbol, horizon)
                });
                refreshed.push((symbol, series));
            }
        }

        info!(
            %horizon,
            symbols = symbols.len(),
            failed,
            "chart cache refresh complete"
        );
        refreshed
    }

    /// Remove entries whose age reached the retention period. Returns the number removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.inner.clock.now_ms();
        let retention = duration_ms(self.inner.config.retention);

        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.age(now) < retention);
        let evicted = before - entries.len();

        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "evicted expired chart entries");
        }
        evicted
    }

    /// Insert an entry fetched elsewhere, replacing any existing entry for its key.
    pub fn seed(&self, entry: CacheEntry) {
        self.inner
            .entries
            .write()
            .insert(entry.key(), Arc::new(entry));
    }

    pub fn get(&self, symbol: &str, horizon: Horizon) -> Option<Arc<CacheEntry>> {
        self.inner
            .entries
            .read()
            .get(&(Symbol::new(symbol), horizon))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    fn fallback(&self, symbol: &Symbol, horizon: Horizon) -> Vec<f64> {
        self.inner
            .entries
            .read()
            .get(&(symbol.clone(), horizon))
            .map(|entry| entry.series.clone())
            .unwrap_or_default()
    }

    /// Join the in-flight refresh of `(symbol, horizon)`, starting one if there is none.
    async fn refresh_one(&self, symbol: Symbol, horizon: Horizon) -> Result<Arc<CacheEntry>, DataError> {
        let key = (symbol, horizon);

        let flight = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(&key) {
                Some(flight) => flight.clone(),
                None => {
                    let cache = self.clone();
                    let flight_key = key.clone();
                    let flight = async move { cache.fetch_and_store(flight_key).await }
                        .boxed()
                        .shared();
                    in_flight.insert(key, flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    async fn fetch_and_store(&self, key: CacheKey) -> Result<Arc<CacheEntry>, DataError> {
        let (symbol, horizon) = key.clone();
        let request = CandleRequest::ending_at(
            symbol.clone(),
            self.inner.config.ranges.get(horizon),
            self.inner.clock.now_ms(),
        );
        let timeout = self.inner.config.fetch_timeout;

        let outcome = tokio::time::timeout(timeout, self.inner.source.fetch_candles(&request))
            .await
            .map_err(|_| DataError::Timeout(timeout))
            .and_then(|result| result)
            .map(|candles| {
                let series = sanitize(candles, self.inner.config.max_points);
                let entry = Arc::new(CacheEntry::new(
                    symbol,
                    horizon,
                    series,
                    self.inner.clock.now_ms(),
                ));
                self.inner
                    .entries
                    .write()
                    .insert(key.clone(), Arc::clone(&entry));
                entry
            });

        // Entry is stored before the flight is released, so later callers see it
        self.inner.in_flight.lock().remove(&key);
        outcome
    }
}

/// Trim, drop blanks and de-duplicate while preserving request order.
fn normalize_symbols<I>(symbols: I) -> Result<Vec<Symbol>, DataError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let symbols = symbols
        .into_iter()
        .filter_map(|symbol| {
            let symbol = symbol.as_ref().trim();
            (!symbol.is_empty()).then(|| Symbol::new(symbol))
        })
        .unique()
        .collect::<Vec<_>>();

    if symbols.is_empty() {
        return Err(DataError::InvalidInput("symbols array is required".to_string()));
    }
    Ok(symbols)
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
