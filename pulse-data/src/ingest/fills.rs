use crate::{Symbol, de::parse_opt_price, feed::RawFill};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, sync::Arc};

/// Default number of fills retained by a [`FillTape`].
pub const DEFAULT_FILLS_CAPACITY: usize = 5_000;

const MINUTE_MS: i64 = 60_000;

/// Fill tape shared between the ingestion controller and readers.
pub type SharedFillTape = Arc<Mutex<FillTape>>;

/// Normalised fill observed on the `allFills` channel.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    /// Receive time in epoch milliseconds.
    pub timestamp: i64,
    pub symbol: Symbol,
    pub side: String,
    pub price: f64,
    pub size: f64,
    /// Notional value, `price * size`.
    pub value: f64,
    pub direction: String,
    pub pnl: f64,
    /// Shortened trader address, eg/ "0x1234...cdef".
    pub address: String,
    pub hash: String,
}

impl Fill {
    /// Normalise a raw fill. Fills without a finite price and size are rejected.
    pub fn from_raw(address: &str, raw: RawFill, now: i64) -> Option<Self> {
        let value = raw.px * raw.sz;
        if !value.is_finite() {
            return None;
        }

        Some(Self {
            timestamp: now,
            symbol: raw.coin,
            side: raw.side,
            price: raw.px,
            size: raw.sz,
            value,
            direction: raw.dir,
            pnl: parse_opt_price(raw.closed_pnl.as_ref())
                .ok()
                .flatten()
                .unwrap_or_default(),
            address: shorten_address(address),
            hash: raw.hash,
        })
    }
}

/// Running fill statistics.
#[derive(Copy, Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillStats {
    pub total_fills: u64,
    /// Total notional volume.
    pub total_volume: f64,
    /// Fills counted during the previous full minute.
    pub fills_per_minute: u64,
}

/// Bounded newest-first tape of [`Fill`]s with running [`FillStats`].
#[derive(Debug, Clone)]
pub struct FillTape {
    capacity: usize,
    fills: VecDeque<Fill>,
    stats: FillStats,
    minute_count: u64,
    minute_started_at: i64,
}

impl FillTape {
    pub fn new(capacity: usize, now: i64) -> Self {
        Self {
            capacity,
            fills: VecDeque::with_capacity(capacity.min(DEFAULT_FILLS_CAPACITY)),
            stats: FillStats::default(),
            minute_count: 0,
            minute_started_at: now,
        }
    }

    pub fn shared(capacity: usize, now: i64) -> SharedFillTape {
        Arc::new(Mutex::new(Self::new(capacity, now)))
    }

    /// Record a batch of `(address, fill)` pairs received at `now`.
    ///
    /// Returns the number of fills recorded.
    pub fn record<I>(&mut self, batch: I, now: i64) -> usize
    where
        I: IntoIterator<Item = (String, RawFill)>,
    {
        self.roll_minute(now);

        let mut recorded = 0;
        for (address, raw) in batch {
            let Some(fill) = Fill::from_raw(&address, raw, now) else {
                continue;
            };

            self.stats.total_fills += 1;
            self.stats.total_volume += fill.value;
            self.minute_count += 1;
            self.fills.push_front(fill);
            recorded += 1;
        }

        self.fills.truncate(self.capacity);
        recorded
    }

    /// Most recent `limit` fills, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Fill> {
        self.fills.iter().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> FillStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.fills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }

    /// Forget every fill and reset the statistics.
    pub fn clear(&mut self, now: i64) {
        self.fills.clear();
        self.stats = FillStats::default();
        self.minute_count = 0;
        self.minute_started_at = now;
    }

    fn roll_minute(&mut self, now: i64) {
        if now - self.minute_started_at >= MINUTE_MS {
            self.stats.fills_per_minute = self.minute_count;
            self.minute_count = 0;
            self.minute_started_at = now;
        }
    }
}

impl Default for FillTape {
    fn default() -> Self {
        Self::new(DEFAULT_FILLS_CAPACITY, 0)
    }
}

/// Shorten an address to its first 6 and last 4 characters.
fn shorten_address(address: &str) -> String {
    let chars = address.chars().collect::<Vec<_>>();
    match chars.len() {
        0 => "Unknown".to_string(),
        len if len <= 10 => address.to_string(),
        len => format!(
            "{}...{}",
            chars[..6].iter().collect::<String>(),
            chars[len - 4..].iter().collect::<String>()
        ),
    }
}
