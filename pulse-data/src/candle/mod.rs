use crate::{Symbol, error::DataError, series::SeriesPoint};
use async_trait::async_trait;
use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};

/// Hyperliquid `info` endpoint client implementing [`HistoricalSource`].
pub mod hyperliquid;

/// Candle granularity understood by the historical source.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
pub enum CandleInterval {
    #[display("1m")]
    #[serde(rename = "1m")]
    OneMinute,
    #[display("3m")]
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[display("15m")]
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[display("30m")]
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[display("1h")]
    #[serde(rename = "1h")]
    OneHour,
    #[display("4h")]
    #[serde(rename = "4h")]
    FourHours,
    #[display("1d")]
    #[serde(rename = "1d")]
    OneDay,
}

impl CandleInterval {
    pub fn as_millis(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            CandleInterval::OneMinute => MINUTE,
            CandleInterval::ThreeMinutes => 3 * MINUTE,
            CandleInterval::FifteenMinutes => 15 * MINUTE,
            CandleInterval::ThirtyMinutes => 30 * MINUTE,
            CandleInterval::OneHour => 60 * MINUTE,
            CandleInterval::FourHours => 4 * 60 * MINUTE,
            CandleInterval::OneDay => 24 * 60 * MINUTE,
        }
    }
}

/// How a horizon is fetched from the historical source: `lookback` candles of `interval`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize, Constructor)]
pub struct RangeConfig {
    pub interval: CandleInterval,
    pub lookback: u32,
}

impl RangeConfig {
    /// Width of the requested window in milliseconds.
    pub fn window_millis(&self) -> i64 {
        self.interval.as_millis() * i64::from(self.lookback)
    }
}

/// Request for the candles of one symbol over `[start_time, end_time]`, epoch milliseconds.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize, Constructor)]
pub struct CandleRequest {
    pub symbol: Symbol,
    pub interval: CandleInterval,
    pub start_time: i64,
    pub end_time: i64,
}

impl CandleRequest {
    /// Request the window described by `range` that ends at `now`.
    pub fn ending_at(symbol: Symbol, range: RangeConfig, now: i64) -> Self {
        Self::new(symbol, range.interval, now - range.window_millis(), now)
    }
}

/// Open time and close price of a historical candle.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize, Constructor)]
pub struct Candle {
    pub open_time: i64,
    pub close: f64,
}

impl Candle {
    /// Candles with a non-finite or non-positive close carry no usable price.
    pub fn is_valid(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}

impl From<Candle> for SeriesPoint {
    fn from(value: Candle) -> Self {
        SeriesPoint::new(value.open_time, value.close)
    }
}

/// Upstream capable of returning historical candles, ordered by ascending open time.
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    /// Fetch the candles of a single symbol. An upstream that answers with something other
    /// than a candle sequence yields an empty `Vec`.
    async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, DataError>;

    /// Fetch the tradable universe of symbols.
    async fn discover_symbols(&self) -> Result<Vec<Symbol>, DataError> {
        Ok(Vec::new())
    }
}
