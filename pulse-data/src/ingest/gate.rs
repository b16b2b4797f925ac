use crate::Symbol;
use fnv::FnvHashMap;
use std::time::Duration;

/// Per-symbol rate gate deciding which live prices become series samples.
///
/// A symbol's first price is always admitted. After that a price is admitted only once
/// `interval` has elapsed since the last admitted one.
#[derive(Debug, Clone)]
pub struct SamplingGate {
    interval_ms: i64,
    last_sample: FnvHashMap<Symbol, i64>,
}

impl SamplingGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: i64::try_from(interval.as_millis()).unwrap_or(i64::MAX),
            last_sample: FnvHashMap::default(),
        }
    }

    /// Returns `true` and records `now` if a sample of `symbol` taken at `now` is admitted.
    pub fn admit(&mut self, symbol: &Symbol, now: i64) -> bool {
        match self.last_sample.get_mut(symbol) {
            Some(last) if now.saturating_sub(*last) < self.interval_ms => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                self.last_sample.insert(symbol.clone(), now);
                true
            }
        }
    }

    /// Time of the last admitted sample of `symbol`.
    pub fn last_sample(&self, symbol: &str) -> Option<i64> {
        self.last_sample.get(symbol).copied()
    }
}
