use super::circular::{CircularStore, SeriesPoint};
use crate::error::DataError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{num::NonZeroUsize, str::FromStr};

/// Fixed look-back window of a price series.
///
/// Capacities assume one live sample per minute, so a [`Horizon`] only differs from another
/// in how many raw samples it retains.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub enum Horizon {
    OneHour,
    FourHours,
    #[default]
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl Horizon {
    /// Every horizon in fan-out order.
    pub const ALL: [Horizon; 5] = [
        Horizon::OneHour,
        Horizon::FourHours,
        Horizon::OneDay,
        Horizon::SevenDays,
        Horizon::ThirtyDays,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::OneHour => "1H",
            Horizon::FourHours => "4H",
            Horizon::OneDay => "1D",
            Horizon::SevenDays => "7D",
            Horizon::ThirtyDays => "30D",
        }
    }

    /// Number of one-minute samples retained for this horizon.
    pub fn capacity(&self) -> NonZeroUsize {
        let minutes = match self {
            Horizon::OneHour => 60,
            Horizon::FourHours => 4 * 60,
            Horizon::OneDay => 24 * 60,
            Horizon::SevenDays => 7 * 24 * 60,
            Horizon::ThirtyDays => 30 * 24 * 60,
        };
        NonZeroUsize::new(minutes).unwrap_or(NonZeroUsize::MIN)
    }

    /// Parse a horizon id, falling back to the default horizon when it is unknown.
    pub fn normalize(id: &str) -> Self {
        id.parse().unwrap_or_default()
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Horizon::OneHour => 0,
            Horizon::FourHours => 1,
            Horizon::OneDay => 2,
            Horizon::SevenDays => 3,
            Horizon::ThirtyDays => 4,
        }
    }
}

impl FromStr for Horizon {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Horizon::ALL
            .into_iter()
            .find(|horizon| horizon.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DataError::UnknownHorizon(s.to_string()))
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Horizon {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Horizon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        id.parse().map_err(serde::de::Error::custom)
    }
}

/// One [`CircularStore`] per [`Horizon`] for a single symbol.
#[derive(Debug, Clone)]
pub struct HorizonSet {
    stores: [CircularStore; 5],
}

impl HorizonSet {
    pub fn new() -> Self {
        Self {
            stores: Horizon::ALL.map(|horizon| CircularStore::new(horizon.capacity())),
        }
    }

    /// Fan one sample out to every horizon, in [`Horizon::ALL`] order.
    pub fn append_to_all(&mut self, timestamp: i64, value: f64) {
        for store in self.stores.iter_mut() {
            store.append(timestamp, value);
        }
    }

    pub fn horizon(&self, horizon: Horizon) -> &CircularStore {
        &self.stores[horizon.index()]
    }

    pub fn horizon_mut(&mut self, horizon: Horizon) -> &mut CircularStore {
        &mut self.stores[horizon.index()]
    }

    /// Look a store up by its horizon id (eg/ "1D").
    pub fn get_horizon(&self, id: &str) -> Option<&CircularStore> {
        id.parse::<Horizon>().ok().map(|horizon| self.horizon(horizon))
    }

    /// Values of the most recent `count` points of a horizon, timestamps dropped.
    pub fn read_horizon(&self, horizon: Horizon, count: Option<usize>) -> Vec<f64> {
        self.horizon(horizon).read_values(count)
    }

    pub fn read_points(&self, horizon: Horizon, count: Option<usize>) -> Vec<SeriesPoint> {
        self.horizon(horizon).read(count)
    }

    pub fn has_data(&self, horizon: Horizon) -> bool {
        !self.horizon(horizon).is_empty()
    }

    pub fn clear_all(&mut self) {
        for store in self.stores.iter_mut() {
            store.clear();
        }
    }
}

impl Default for HorizonSet {
    fn default() -> Self {
        Self::new()
    }
}
