use crate::{Symbol, candle::Candle, series::Horizon};
use serde::{Deserialize, Serialize};

/// Cache key: one series per `(symbol, horizon)`.
pub type CacheKey = (Symbol, Horizon);

/// Series fetched for one [`CacheKey`]. Entries are immutable, a refresh replaces the whole
/// entry.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub symbol: Symbol,
    pub horizon: Horizon,
    /// Close prices, ascending by time.
    pub series: Vec<f64>,
    /// Epoch milliseconds.
    pub fetched_at: i64,
}

impl CacheEntry {
    pub fn new(symbol: Symbol, horizon: Horizon, series: Vec<f64>, fetched_at: i64) -> Self {
        Self {
            symbol,
            horizon,
            series,
            fetched_at,
        }
    }

    pub fn key(&self) -> CacheKey {
        (self.symbol.clone(), self.horizon)
    }

    pub fn age(&self, now: i64) -> i64 {
        now - self.fetched_at
    }

    /// Fresh entries are served without a refresh.
    pub fn is_fresh(&self, now: i64, ttl_ms: i64) -> bool {
        self.age(now) < ttl_ms
    }
}

/// Close prices of `candles` with unusable values dropped, keeping the most recent
/// `max_points`.
pub fn sanitize(candles: Vec<Candle>, max_points: usize) -> Vec<f64> {
    let mut series = candles
        .into_iter()
        .filter(Candle::is_valid)
        .map(|candle| candle.close)
        .collect::<Vec<_>>();

    let excess = series.len().saturating_sub(max_points);
    series.drain(..excess);
    series
}
