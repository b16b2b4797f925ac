//! Environment driven configuration.
//!
//! Every value has a typed default and is read once at start-up by [`PulseConfig::from_env`].
//! Sub-configurations are plain structs with `with_*` builders so tests and embedders can
//! construct them directly.

use crate::{
    Symbol,
    candle::{CandleInterval, RangeConfig, hyperliquid::HYPERLIQUID_INFO_URL},
    ingest::publish::SortCriterion,
    series::Horizon,
};
use std::{net::SocketAddr, time::Duration};
use url::Url;

/// Default live feed endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://api.hydromancer.xyz/ws";

/// Per-[`Horizon`] candle fetch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeTable {
    ranges: [RangeConfig; 5],
}

impl RangeTable {
    /// Build a table from configs given in [`Horizon::ALL`] order.
    pub fn new(ranges: [RangeConfig; 5]) -> Self {
        Self { ranges }
    }

    /// Coarse table used by the server cache, roughly 60 to 180 points per horizon.
    pub fn cache() -> Self {
        use CandleInterval::*;
        Self::new([
            RangeConfig::new(OneMinute, 60),
            RangeConfig::new(ThreeMinutes, 80),
            RangeConfig::new(FifteenMinutes, 96),
            RangeConfig::new(OneHour, 168),
            RangeConfig::new(FourHours, 180),
        ])
    }

    /// Table used to backfill live horizon stores.
    pub fn backfill() -> Self {
        use CandleInterval::*;
        Self::new([
            RangeConfig::new(OneMinute, 60),
            RangeConfig::new(OneMinute, 240),
            RangeConfig::new(OneMinute, 1_440),
            RangeConfig::new(OneHour, 168),
            RangeConfig::new(OneHour, 720),
        ])
    }

    pub fn get(&self, horizon: Horizon) -> RangeConfig {
        self.ranges[horizon.index()]
    }

    pub fn with_range(mut self, horizon: Horizon, range: RangeConfig) -> Self {
        self.ranges[horizon.index()] = range;
        self
    }
}

/// Live feed connection configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Feed WebSocket URL, without credentials.
    pub url: String,
    /// Optional API token appended as the `token` query parameter.
    pub token: Option<String>,
    /// Interval between WebSocket protocol pings.
    pub ping_interval: Duration,
    /// Delay before reconnecting after a disconnect.
    pub reconnect_delay: Duration,
    /// Idle period after which a silent connection is considered dead.
    pub read_timeout: Duration,
    /// Buffer size of the feed event channel.
    pub channel_buffer_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            token: None,
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(3),
            read_timeout: Duration::from_secs(120),
            channel_buffer_size: 10_000,
        }
    }
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }

    /// Feed URL with the token, if any, appended as a query parameter.
    pub fn connect_url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.url)?;
        if let Some(token) = self.token.as_deref().filter(|token| !token.is_empty()) {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

/// Live ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Minimum spacing between two samples of the same symbol.
    pub sample_interval: Duration,
    /// Quiet period after the last tick before a snapshot is published.
    pub publish_quiet: Duration,
    /// Delay before retrying a failed asset discovery.
    pub discovery_retry: Duration,
    /// Number of symbols backfilled concurrently.
    pub backfill_batch_size: usize,
    /// Symbols tracked on top of the discovered universe.
    pub extra_symbols: Vec<Symbol>,
    /// Candle parameters used to backfill each horizon.
    pub backfill_ranges: RangeTable,
    /// Capacity of the fills tape.
    pub fills_capacity: usize,
    /// Order of the assets in published snapshots.
    pub sort: SortCriterion,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(60),
            publish_quiet: Duration::from_millis(500),
            discovery_retry: Duration::from_secs(2),
            backfill_batch_size: 20,
            extra_symbols: Vec::new(),
            backfill_ranges: RangeTable::backfill(),
            fills_capacity: 5_000,
            sort: SortCriterion::default(),
        }
    }
}

impl IngestConfig {
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_publish_quiet(mut self, quiet: Duration) -> Self {
        self.publish_quiet = quiet;
        self
    }

    pub fn with_discovery_retry(mut self, delay: Duration) -> Self {
        self.discovery_retry = delay;
        self
    }

    pub fn with_backfill_batch_size(mut self, size: usize) -> Self {
        self.backfill_batch_size = size.max(1);
        self
    }

    pub fn with_extra_symbols(mut self, symbols: impl IntoIterator<Item = Symbol>) -> Self {
        self.extra_symbols = symbols.into_iter().collect();
        self
    }

    pub fn with_backfill_ranges(mut self, ranges: RangeTable) -> Self {
        self.backfill_ranges = ranges;
        self
    }

    pub fn with_fills_capacity(mut self, capacity: usize) -> Self {
        self.fills_capacity = capacity;
        self
    }

    pub fn with_sort(mut self, sort: SortCriterion) -> Self {
        self.sort = sort;
        self
    }
}

/// Server freshness cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries younger than this are served without a refresh.
    pub ttl: Duration,
    /// Entries older than this are removed by the retention sweep.
    pub retention: Duration,
    /// Maximum number of points kept per series.
    pub max_points: usize,
    /// Number of concurrent upstream fetches per refresh batch.
    pub batch_size: usize,
    /// Timeout applied to every upstream fetch.
    pub fetch_timeout: Duration,
    /// Serve stale entries immediately and refresh them in the background.
    pub stale_while_revalidate: bool,
    /// Candle parameters used for each horizon.
    pub ranges: RangeTable,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retention: Duration::from_secs(5 * 60),
            max_points: 120,
            batch_size: 20,
            fetch_timeout: Duration::from_secs(10),
            stale_while_revalidate: true,
            ranges: RangeTable::cache(),
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    pub fn with_ranges(mut self, ranges: RangeTable) -> Self {
        self.ranges = ranges;
        self
    }
}

/// Complete process configuration.
#[derive(Debug, Clone)]
pub struct PulseConfig {
    /// Historical source `info` endpoint.
    pub info_url: String,
    pub feed: FeedConfig,
    pub ingest: IngestConfig,
    pub cache: CacheConfig,
    /// HTTP API listen address.
    pub http_addr: SocketAddr,
    /// Snapshot broadcaster listen address.
    pub ws_addr: SocketAddr,
    /// Capacity of the snapshot broadcast channel.
    pub ws_buffer_size: usize,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            info_url: HYPERLIQUID_INFO_URL.to_string(),
            feed: FeedConfig::default(),
            ingest: IngestConfig::default(),
            cache: CacheConfig::default(),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            ws_buffer_size: 64,
        }
    }
}

impl PulseConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`. Missing, blank or unparsable values fall back
    /// to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = Self::default();

        let feed = FeedConfig {
            url: env.string("PULSE_FEED_URL").unwrap_or(defaults.feed.url),
            token: env.string("PULSE_FEED_TOKEN"),
            ping_interval: env.millis("FEED_PING_INTERVAL_MS", defaults.feed.ping_interval),
            reconnect_delay: env.millis("RECONNECT_DELAY_MS", defaults.feed.reconnect_delay),
            read_timeout: env.millis("FEED_READ_TIMEOUT_MS", defaults.feed.read_timeout),
            channel_buffer_size: defaults.feed.channel_buffer_size,
        };

        let ingest = IngestConfig {
            sample_interval: env.millis("SAMPLE_INTERVAL_MS", defaults.ingest.sample_interval),
            publish_quiet: env.millis("PUBLISH_QUIET_MS", defaults.ingest.publish_quiet),
            extra_symbols: env
                .string("PULSE_EXTRA_SYMBOLS")
                .map(|list| parse_symbol_list(&list))
                .unwrap_or_default(),
            sort: env.parse("PUBLISH_SORT").unwrap_or(defaults.ingest.sort),
            ..defaults.ingest
        };

        let cache = CacheConfig {
            ttl: env.millis("CACHE_TTL_MS", defaults.cache.ttl),
            retention: env.millis("RETENTION_MS", defaults.cache.retention),
            max_points: env.parse("MAX_POINTS").unwrap_or(defaults.cache.max_points),
            batch_size: env
                .parse::<usize>("BATCH_SIZE")
                .map(|size| size.max(1))
                .unwrap_or(defaults.cache.batch_size),
            fetch_timeout: env.millis("FETCH_TIMEOUT_MS", defaults.cache.fetch_timeout),
            stale_while_revalidate: env
                .bool("STALE_WHILE_REVALIDATE")
                .unwrap_or(defaults.cache.stale_while_revalidate),
            ranges: defaults.cache.ranges,
        };

        Self {
            info_url: env.string("PULSE_INFO_URL").unwrap_or(defaults.info_url),
            feed,
            ingest,
            cache,
            http_addr: env.parse("HTTP_ADDR").unwrap_or(defaults.http_addr),
            ws_addr: env.parse("WS_ADDR").unwrap_or(defaults.ws_addr),
            ws_buffer_size: env
                .parse::<usize>("WS_BUFFER_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(defaults.ws_buffer_size),
        }
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.string(name).and_then(|value| value.parse().ok())
    }

    fn millis(&self, name: &str, default: Duration) -> Duration {
        self.parse::<u64>(name)
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.string(name)
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
    }
}

/// Parse a comma separated symbol list, dropping blanks and duplicates.
fn parse_symbol_list(list: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for symbol in list.split(',').map(str::trim).filter(|symbol| !symbol.is_empty()) {
        if !symbols.iter().any(|existing: &Symbol| existing == symbol) {
            symbols.push(Symbol::new(symbol));
        }
    }
    symbols
}
