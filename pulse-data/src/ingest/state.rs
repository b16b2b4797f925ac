use crate::{
    Symbol,
    de::parse_opt_price,
    error::DataError,
    feed::AssetCtxFields,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a tracked symbol. Symbols nobody has seen yet have no state at all.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetPhase {
    /// Placeholder created by discovery, no tick received yet.
    #[default]
    Seeded,
    /// At least one tick has been applied.
    Live,
}

/// Latest known market context of one symbol.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveAssetState {
    pub symbol: Symbol,
    pub last_price: f64,
    pub oracle_price: Option<f64>,
    pub mid_price: Option<f64>,
    /// Impact bid and ask prices.
    pub impact: Option<(f64, f64)>,
    /// Change of `last_price` relative to the previously stored price.
    pub percent_change: f64,
    pub spread_pct: Option<f64>,
    pub last_update_ts: i64,
    pub phase: AssetPhase,
}

impl LiveAssetState {
    /// Zero-price placeholder for a discovered symbol.
    pub fn seeded(symbol: Symbol, now: i64) -> Self {
        Self {
            symbol,
            last_price: 0.0,
            oracle_price: None,
            mid_price: None,
            impact: None,
            percent_change: 0.0,
            spread_pct: None,
            last_update_ts: now,
            phase: AssetPhase::Seeded,
        }
    }

    /// Apply a decoded tick. A tick without a mark price keeps the previous price.
    pub fn apply(&mut self, tick: &ParsedTick, now: i64) {
        let previous = self.last_price;
        let price = tick.mark_price.unwrap_or(previous);

        self.percent_change = if previous > 0.0 {
            (price - previous) / previous * 100.0
        } else {
            0.0
        };
        self.last_price = price;
        self.oracle_price = tick.oracle_price;
        self.mid_price = tick.mid_price;
        self.impact = tick.impact;
        self.spread_pct = tick.spread_pct();
        self.last_update_ts = now;
        self.phase = AssetPhase::Live;
    }
}

/// Decoded `activeAssetCtx` price fields. Every present field is finite.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct ParsedTick {
    pub mark_price: Option<f64>,
    pub oracle_price: Option<f64>,
    pub mid_price: Option<f64>,
    pub impact: Option<(f64, f64)>,
}

impl ParsedTick {
    /// Decode raw fields, failing if any present field is malformed or non-finite.
    pub fn parse(fields: &AssetCtxFields) -> Result<Self, DataError> {
        Ok(Self {
            mark_price: parse_opt_price(fields.mark_px.as_ref())?,
            oracle_price: parse_opt_price(fields.oracle_px.as_ref())?,
            mid_price: parse_opt_price(fields.mid_px.as_ref())?,
            impact: parse_impact(fields.impact_pxs.as_ref())?,
        })
    }

    /// Spread between impact prices as a percentage of the lower one.
    pub fn spread_pct(&self) -> Option<f64> {
        let (low, high) = self.impact?;
        let spread = (high - low) / low * 100.0;
        spread.is_finite().then_some(spread)
    }
}

/// Impact prices are only meaningful as a `[low, high]` pair, anything else is ignored.
fn parse_impact(field: Option<&Value>) -> Result<Option<(f64, f64)>, DataError> {
    let Some(Value::Array(pair)) = field else {
        return Ok(None);
    };
    let [low, high] = pair.as_slice() else {
        return Ok(None);
    };

    match (parse_opt_price(Some(low))?, parse_opt_price(Some(high))?) {
        (Some(low), Some(high)) => Ok(Some((low, high))),
        _ => Ok(None),
    }
}
