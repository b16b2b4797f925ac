use super::{fills::FillStats, state::LiveAssetState};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, str::FromStr, time::Duration};
use tokio::time::Instant;

/// Order of the assets in a published [`AssetSnapshot`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortCriterion {
    /// Largest absolute percent change first.
    #[default]
    AbsPercentChange,
    /// Largest percent change first.
    PercentChange,
    /// Highest price first.
    Price,
    /// Widest spread first, assets without a spread last.
    Spread,
    /// Alphabetical.
    Symbol,
}

impl SortCriterion {
    /// Sort `assets` in place. Ties are broken by symbol so snapshots are deterministic.
    pub fn sort(&self, assets: &mut [LiveAssetState]) {
        assets.sort_by(|a, b| self.compare(a, b).then_with(|| a.symbol.cmp(&b.symbol)));
    }

    fn compare(&self, a: &LiveAssetState, b: &LiveAssetState) -> Ordering {
        match self {
            SortCriterion::AbsPercentChange => {
                b.percent_change.abs().total_cmp(&a.percent_change.abs())
            }
            SortCriterion::PercentChange => b.percent_change.total_cmp(&a.percent_change),
            SortCriterion::Price => b.last_price.total_cmp(&a.last_price),
            SortCriterion::Spread => match (a.spread_pct, b.spread_pct) {
                (Some(a), Some(b)) => b.total_cmp(&a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            SortCriterion::Symbol => Ordering::Equal,
        }
    }
}

impl FromStr for SortCriterion {
    type Err = crate::error::DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abs_percent_change" | "movers" => Ok(Self::AbsPercentChange),
            "percent_change" | "change" => Ok(Self::PercentChange),
            "price" => Ok(Self::Price),
            "spread" => Ok(Self::Spread),
            "symbol" => Ok(Self::Symbol),
            other => Err(crate::error::DataError::InvalidInput(format!(
                "unknown sort criterion: {other}"
            ))),
        }
    }
}

/// Point-in-time view of every tracked asset, handed to consumers after a quiet period.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSnapshot {
    pub assets: Vec<LiveAssetState>,
    pub fills: FillStats,
    /// Epoch milliseconds.
    pub generated_at: i64,
}

/// Debounce timer: every [`rearm`](Self::rearm) pushes the deadline `quiet` into the future,
/// so it only fires once ticks stop arriving for that long.
#[derive(Debug, Clone)]
pub struct QuietPeriod {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl QuietPeriod {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    pub fn rearm(&mut self) {
        self.deadline = Some(Instant::now() + self.quiet);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

/// Resolve at `deadline`, or never if there is none.
pub async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
