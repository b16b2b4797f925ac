#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cast_possible_truncation,
    unused_crate_dependencies,
    clippy::unused_self,
    rust_2018_idioms,
    missing_debug_implementations
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # Pulse-Data
//! Bounded multi-horizon price series for perpetual futures markets.
//!
//! A live asset-context feed is sampled once per minute per symbol and fanned out into fixed
//! capacity ring buffers, one per look-back horizon (1H, 4H, 1D, 7D, 30D), so memory never grows
//! with uptime. A freshness-gated [`ChartCache`](cache::ChartCache) serves the same kind of
//! series to callers without live buffers, refreshing from a historical candle source in
//! bounded-concurrency batches and degrading per symbol when the upstream fails.
//!
//! ## Layout
//! * [`series`]: circular stores, horizon sets and the [`SeriesBook`](series::SeriesBook).
//! * [`feed`]: reconnecting WebSocket client for the live asset-context and fills streams.
//! * [`ingest`]: tick parsing, the per-symbol sampling gate, debounced snapshot publishing,
//!   the fills tape and candle backfill.
//! * [`candle`]: historical candle model and the [`HistoricalSource`](candle::HistoricalSource)
//!   abstraction with its Hyperliquid implementation.
//! * [`cache`]: the server-side freshness cache.
//! * [`config`]: environment driven configuration with typed defaults.

use smol_str::SmolStr;

#[cfg(test)]
use criterion as _;

/// All [`Error`](std::error::Error)s generated in Pulse-Data.
pub mod error;

/// Deserialization helpers for string encoded exchange numbers.
pub mod de;

/// Wall-clock abstraction so freshness and sampling logic can be driven by tests.
pub mod clock;

/// Bounded in-memory price series.
pub mod series;

/// Historical candle model and upstream candle sources.
pub mod candle;

/// Live WebSocket feed client and its wire messages.
pub mod feed;

/// Live ingestion: tick parsing, sampling, publishing, fills and backfill.
pub mod ingest;

/// Server-side freshness-gated series cache.
pub mod cache;

/// Environment driven configuration.
pub mod config;

/// Market symbol as it appears on the wire, eg/ "BTC" or "xyz:NVDA".
pub type Symbol = SmolStr;
