use super::{
    circular::SeriesPoint,
    horizon::{Horizon, HorizonSet},
};
use crate::Symbol;
use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Process-wide table of [`HorizonSet`]s keyed by symbol.
///
/// Live ingestion and backfill write from different tasks, so every [`HorizonSet`] sits behind
/// its own mutex: a fan-out is observed by readers either on every horizon or on none. The
/// table lock is only held long enough to find or create an entry.
#[derive(Debug, Clone, Default)]
pub struct SeriesBook {
    sets: Arc<RwLock<FnvHashMap<Symbol, Arc<Mutex<HorizonSet>>>>>,
}

impl SeriesBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fan a sample out to every horizon of `symbol`, creating its [`HorizonSet`] on first use.
    pub fn append(&self, symbol: &Symbol, timestamp: i64, value: f64) {
        self.get_or_create(symbol).lock().append_to_all(timestamp, value);
    }

    /// Merge historical points into a single horizon of `symbol`.
    ///
    /// Returns the number of points that were retained.
    pub fn seed_history<I>(&self, symbol: &Symbol, horizon: Horizon, history: I) -> usize
    where
        I: IntoIterator<Item = SeriesPoint>,
    {
        self.get_or_create(symbol)
            .lock()
            .horizon_mut(horizon)
            .seed_history(history)
    }

    /// Values of the most recent `count` points, empty for unknown symbols.
    pub fn read(&self, symbol: &str, horizon: Horizon, count: Option<usize>) -> Vec<f64> {
        self.get(symbol)
            .map(|set| set.lock().read_horizon(horizon, count))
            .unwrap_or_default()
    }

    pub fn read_points(
        &self,
        symbol: &str,
        horizon: Horizon,
        count: Option<usize>,
    ) -> Vec<SeriesPoint> {
        self.get(symbol)
            .map(|set| set.lock().read_points(horizon, count))
            .unwrap_or_default()
    }

    pub fn has_data(&self, symbol: &str, horizon: Horizon) -> bool {
        self.get(symbol)
            .is_some_and(|set| set.lock().has_data(horizon))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.sets.read().contains_key(symbol)
    }

    /// Symbols that own a [`HorizonSet`], sorted.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols = self.sets.read().keys().cloned().collect::<Vec<_>>();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.sets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.read().is_empty()
    }

    fn get(&self, symbol: &str) -> Option<Arc<Mutex<HorizonSet>>> {
        self.sets.read().get(symbol).cloned()
    }

    fn get_or_create(&self, symbol: &Symbol) -> Arc<Mutex<HorizonSet>> {
        if let Some(set) = self.get(symbol) {
            return set;
        }

        self.sets
            .write()
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(Mutex::new(HorizonSet::new())))
            .clone()
    }
}
