//! Bounded in-memory price series.
//!
//! A [`CircularStore`] is a single fixed-capacity ring, a [`HorizonSet`] groups one ring per
//! [`Horizon`] for a symbol, and the [`SeriesBook`] owns the [`HorizonSet`] of every symbol.

/// Fixed-capacity ring of timestamped samples.
pub mod circular;

/// Named look-back horizons and the per-symbol fan-out set.
pub mod horizon;

/// Symbol table of horizon sets shared between ingestion, backfill and readers.
pub mod book;

pub use book::SeriesBook;
pub use circular::{CircularStore, SeriesPoint};
pub use horizon::{Horizon, HorizonSet};
