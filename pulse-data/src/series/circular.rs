use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// A single sample: wall-clock timestamp in epoch milliseconds and the sampled value.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize, Constructor)]
pub struct SeriesPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Fixed-capacity ring of [`SeriesPoint`]s.
///
/// Timestamps and values are held in two parallel arrays allocated once at construction.
/// Once full, every [`append`](Self::append) overwrites exactly the oldest point, so reads
/// always come back in ascending timestamp order provided appends are made in that order.
#[derive(Debug, Clone)]
pub struct CircularStore {
    timestamps: Box<[i64]>,
    values: Box<[f64]>,
    write_cursor: usize,
    is_full: bool,
}

impl CircularStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            timestamps: vec![0; capacity.get()].into_boxed_slice(),
            values: vec![0.0; capacity.get()].into_boxed_slice(),
            write_cursor: 0,
            is_full: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Number of valid points currently retained.
    pub fn size(&self) -> usize {
        if self.is_full {
            self.capacity()
        } else {
            self.write_cursor
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Write a point, evicting the oldest one when the store is full.
    ///
    /// Callers are expected to hand in finite values only.
    pub fn append(&mut self, timestamp: i64, value: f64) {
        self.timestamps[self.write_cursor] = timestamp;
        self.values[self.write_cursor] = value;
        self.write_cursor = (self.write_cursor + 1) % self.capacity();

        if self.write_cursor == 0 {
            self.is_full = true;
        }
    }

    /// Read the most recent `min(count, size)` points in ascending timestamp order.
    ///
    /// `None` reads everything retained.
    pub fn read(&self, count: Option<usize>) -> Vec<SeriesPoint> {
        self.iter_last(count).collect()
    }

    /// Same window as [`read`](Self::read), values only.
    pub fn read_values(&self, count: Option<usize>) -> Vec<f64> {
        self.iter_last(count).map(|point| point.value).collect()
    }

    /// Most recent value, if any.
    pub fn latest(&self) -> Option<f64> {
        self.latest_point().map(|point| point.value)
    }

    pub fn latest_point(&self) -> Option<SeriesPoint> {
        if self.is_empty() {
            return None;
        }

        let capacity = self.capacity();
        let index = (self.write_cursor + capacity - 1) % capacity;
        Some(SeriesPoint::new(self.timestamps[index], self.values[index]))
    }

    /// Forget every point. Capacity is retained.
    pub fn clear(&mut self) {
        self.write_cursor = 0;
        self.is_full = false;
    }

    /// Merge historical points in front of the points already retained.
    ///
    /// Only history strictly older than the oldest retained point is kept, and the merged
    /// series is trimmed to capacity from the oldest end. Returns the number of history
    /// points that survived the merge.
    pub fn seed_history<I>(&mut self, history: I) -> usize
    where
        I: IntoIterator<Item = SeriesPoint>,
    {
        let retained = self.read(None);
        let oldest_retained = retained.first().map(|point| point.timestamp);

        let mut history = history
            .into_iter()
            .filter(|point| point.value.is_finite())
            .filter(|point| oldest_retained.is_none_or(|oldest| point.timestamp < oldest))
            .collect::<Vec<_>>();
        history.sort_by_key(|point| point.timestamp);
        history.dedup_by_key(|point| point.timestamp);

        let merged_len = history.len() + retained.len();
        let skip = merged_len.saturating_sub(self.capacity());
        let seeded = history.len().saturating_sub(skip);

        self.clear();
        for point in history.into_iter().chain(retained).skip(skip) {
            self.append(point.timestamp, point.value);
        }

        seeded
    }

    fn iter_last(&self, count: Option<usize>) -> impl Iterator<Item = SeriesPoint> + '_ {
        let capacity = self.capacity();
        let count = count.unwrap_or(capacity).min(self.size());
        let start = (self.write_cursor + capacity - count) % capacity;

        (0..count).map(move |offset| {
            let index = (start + offset) % capacity;
            SeriesPoint::new(self.timestamps[index], self.values[index])
        })
    }
}
