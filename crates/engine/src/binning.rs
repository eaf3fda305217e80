//! Time bins for charting: fixed-width intervals generated backward from the
//! campaign end and padded on both sides.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tally_core::AppError;

/// Bins generated beyond `ceil(range / granularity)`: one before the start,
/// one past the end and one absorbing the inclusive end bound.
pub const PADDING_BINS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hour,
    SixHours,
    TwelveHours,
    Day,
}

impl Granularity {
    /// ≤24h hourly, ≤72h 6-hourly, ≤144h 12-hourly, otherwise daily.
    pub fn for_range(range: Duration) -> Self {
        let hours = range.num_seconds() as f64 / 3600.0;
        if hours <= 24.0 {
            Granularity::Hour
        } else if hours <= 72.0 {
            Granularity::SixHours
        } else if hours <= 144.0 {
            Granularity::TwelveHours
        } else {
            Granularity::Day
        }
    }

    pub fn seconds(self) -> i64 {
        match self {
            Granularity::Hour => 3_600,
            Granularity::SixHours => 6 * 3_600,
            Granularity::TwelveHours => 12 * 3_600,
            Granularity::Day => 24 * 3_600,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Display label of a bin starting at `start`.
    pub fn label(self, start: DateTime<Utc>) -> String {
        match self {
            Granularity::Day => start.format("%Y-%m-%d").to_string(),
            _ => start.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// Identity of one bin: its position and start instant. Labels are derived
/// from it only at serialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BinId {
    pub index: usize,
    pub start: DateTime<Utc>,
}

/// Chronologically ascending, non-empty bin sequence.
#[derive(Debug, Clone)]
pub struct Bins {
    granularity: Granularity,
    bins: Vec<BinId>,
}

impl Bins {
    /// Build the bins for the window `[start, end]`.
    ///
    /// Granularity follows `end - start`. Bin `k` of `N` starts at
    /// `end - (N - 2 - k) * step`, so the last bin opens one step past `end`.
    pub fn build(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AppError> {
        if end < start {
            return Err(AppError::Config(format!(
                "bin range ends ({end}) before it starts ({start})"
            )));
        }

        let granularity = Granularity::for_range(end - start);
        let step = granularity.seconds();
        let span = (end - start).num_seconds();
        let count = (span + step - 1) / step + PADDING_BINS;

        let bins = (0..count)
            .map(|k| end - Duration::seconds((count - 2 - k) * step))
            .enumerate()
            .map(|(index, start)| BinId { index, start })
            .collect();

        Ok(Self { granularity, bins })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BinId> {
        self.bins.iter()
    }

    pub fn first(&self) -> Option<&BinId> {
        self.bins.first()
    }

    pub fn last(&self) -> Option<&BinId> {
        self.bins.last()
    }

    pub fn label(&self, bin: &BinId) -> String {
        self.granularity.label(bin.start)
    }

    /// The last bin whose start is at or before `ts`; the first bin when `ts`
    /// predates every bin.
    pub fn assign(&self, ts: DateTime<Utc>) -> BinId {
        let after = self.bins.partition_point(|bin| bin.start <= ts);
        self.bins[after.saturating_sub(1)]
    }
}
