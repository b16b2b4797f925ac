use crate::{
    Symbol,
    candle::{CandleRequest, HistoricalSource},
    clock::Clock,
    config::RangeTable,
    error::DataError,
    series::{Horizon, SeriesBook, SeriesPoint},
};
use futures::future::join_all;
use itertools::Itertools;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Outcome of a backfill run, counted per `(symbol, horizon)` pair.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct BackfillReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Historical points merged into horizon stores.
    pub points: usize,
}

/// Seeds live horizon stores with historical candles so charts are populated before the
/// sampling gate has produced enough live samples.
#[derive(Clone)]
pub struct Backfill {
    source: Arc<dyn HistoricalSource>,
    book: SeriesBook,
    clock: Arc<dyn Clock>,
    ranges: RangeTable,
    batch_size: usize,
    fetch_timeout: Duration,
}

impl std::fmt::Debug for Backfill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backfill")
            .field("ranges", &self.ranges)
            .field("batch_size", &self.batch_size)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl Backfill {
    pub fn new(
        source: Arc<dyn HistoricalSource>,
        book: SeriesBook,
        clock: Arc<dyn Clock>,
        ranges: RangeTable,
        batch_size: usize,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            book,
            clock,
            ranges,
            batch_size: batch_size.max(1),
            fetch_timeout,
        }
    }

    /// Backfill every horizon of every symbol.
    ///
    /// Symbols are processed `batch_size` at a time with all of a batch's horizons fetched
    /// concurrently. A failing `(symbol, horizon)` pair is logged and skipped.
    pub async fn run(&self, symbols: &[Symbol]) -> BackfillReport {
        info!(symbols = symbols.len(), "backfilling horizon stores");

        let mut report = BackfillReport::default();
        for batch in symbols.chunks(self.batch_size) {
            let fetches = batch
                .iter()
                .cartesian_product(Horizon::ALL)
                .map(|(symbol, horizon)| self.backfill_one(symbol, horizon));

            for outcome in join_all(fetches).await {
                match outcome {
                    Ok(points) => {
                        report.succeeded += 1;
                        report.points += points;
                    }
                    Err(_) => report.failed += 1,
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            points = report.points,
            "backfill complete, failed pairs fill from live samples"
        );
        report
    }

    async fn backfill_one(&self, symbol: &Symbol, horizon: Horizon) -> Result<usize, DataError> {
        let request = CandleRequest::ending_at(
            symbol.clone(),
            self.ranges.get(horizon),
            self.clock.now_ms(),
        );

        let candles = tokio::time::timeout(self.fetch_timeout, self.source.fetch_candles(&request))
            .await
            .map_err(|_| DataError::Timeout(self.fetch_timeout))
            .and_then(|result| result)
            .inspect_err(|error| {
                warn!(%symbol, %horizon, %error, "backfill fetch failed");
            })?;

        let points = candles
            .into_iter()
            .filter(|candle| candle.is_valid())
            .map(SeriesPoint::from)
            .collect::<Vec<_>>();

        if points.is_empty() {
            debug!(%symbol, %horizon, "backfill returned no usable candles");
            return Err(DataError::Malformed(format!("no candles for {symbol} {horizon}")));
        }

        Ok(self.book.seed_history(symbol, horizon, points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        candle::{Candle, CandleInterval, RangeConfig},
        clock::ManualClock,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MockSource {
        requests: Mutex<Vec<CandleRequest>>,
    }

    #[async_trait]
    impl HistoricalSource for MockSource {
        async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, DataError> {
            self.requests.lock().push(request.clone());
            match request.symbol.as_str() {
                "FAIL" => Err(DataError::RateLimited("429 Too Many Requests".to_string())),
                "EMPTY" => Ok(vec![]),
                _ => Ok(vec![
                    Candle::new(request.start_time, 10.0),
                    Candle::new(request.start_time + 1, 0.0),
                    Candle::new(request.start_time + 2, 11.0),
                ]),
            }
        }
    }

    fn backfill(source: Arc<MockSource>, book: SeriesBook, batch_size: usize) -> Backfill {
        Backfill::new(
            source,
            book,
            Arc::new(ManualClock::new(100_000_000)),
            RangeTable::backfill(),
            batch_size,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_backfill_isolates_failures() {
        let source = Arc::new(MockSource::default());
        let book = SeriesBook::new();
        let symbols = ["BTC", "FAIL", "EMPTY"].map(Symbol::new);

        let report = backfill(source.clone(), book.clone(), 2).run(&symbols).await;

        assert_eq!(
            report,
            BackfillReport {
                succeeded: 5,
                failed: 10,
                points: 10,
            }
        );
        assert_eq!(source.requests.lock().len(), 15);
        for horizon in Horizon::ALL {
            assert_eq!(book.read("BTC", horizon, None), vec![10.0, 11.0]);
        }
        assert!(!book.contains("FAIL"));
    }

    #[tokio::test]
    async fn test_backfill_uses_range_table() {
        let source = Arc::new(MockSource::default());
        backfill(source.clone(), SeriesBook::new(), 20)
            .run(&[Symbol::new("ETH")])
            .await;

        let requests = source.requests.lock();
        let thirty_days = requests
            .iter()
            .find(|request| request.end_time - request.start_time == 720 * 3_600_000)
            .unwrap();
        assert_eq!(thirty_days.interval, CandleInterval::OneHour);
        assert_eq!(thirty_days.end_time, 100_000_000);

        let one_day = RangeConfig::new(CandleInterval::OneMinute, 1_440);
        assert!(
            requests
                .iter()
                .any(|request| request.end_time - request.start_time == one_day.window_millis())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backfill_times_out_slow_fetches() {
        struct SlowSource;

        #[async_trait]
        impl HistoricalSource for SlowSource {
            async fn fetch_candles(&self, _: &CandleRequest) -> Result<Vec<Candle>, DataError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![Candle::new(0, 1.0)])
            }
        }

        let report = Backfill::new(
            Arc::new(SlowSource),
            SeriesBook::new(),
            Arc::new(ManualClock::new(0)),
            RangeTable::backfill(),
            20,
            Duration::from_secs(1),
        )
        .run(&[Symbol::new("BTC")])
        .await;

        assert_eq!(report.failed, 5);
        assert_eq!(report.succeeded, 0);
    }
}
