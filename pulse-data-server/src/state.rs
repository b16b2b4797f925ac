use pulse_data::{
    cache::ChartCache,
    clock::Clock,
    ingest::{AssetSnapshot, SharedFillTape},
    series::SeriesBook,
};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared state handed to every HTTP handler.
pub struct AppState {
    pub cache: ChartCache,
    pub book: SeriesBook,
    pub snapshots: watch::Receiver<Arc<AssetSnapshot>>,
    pub fills: SharedFillTape,
    pub clock: Arc<dyn Clock>,
    /// Epoch milliseconds.
    pub started_at: i64,
}

impl AppState {
    pub fn new(
        cache: ChartCache,
        book: SeriesBook,
        snapshots: watch::Receiver<Arc<AssetSnapshot>>,
        fills: SharedFillTape,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let started_at = clock.now_ms();
        Arc::new(Self {
            cache,
            book,
            snapshots,
            fills,
            clock,
            started_at,
        })
    }

    /// Most recently published asset snapshot.
    pub fn latest_snapshot(&self) -> Arc<AssetSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }
}
