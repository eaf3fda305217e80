//! Ledger aggregation: per-bin totals, cumulative series and token-range
//! histograms.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::config::{Selection, UpperBound};
use tally_storage::models::{Amounts, Axis, BalancesProjection, EventRecord, LedgerSnapshot};

use crate::binning::Bins;

/// Upper edges of the first three histogram buckets; the fourth is open.
pub const BUCKET_BOUNDS: [f64; 3] = [1e5, 1e6, 1e7];

pub const BUCKET_LABELS: [&str; 4] = ["0-100K", "100K-1M", "1M-10M", "10M+"];

// ─── Window ─────────────────────────────────────────────────────────────────

/// Closed time range `[start, end]` an event must fall in to be binned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    /// `None` disables the upper clip.
    pub end: Option<DateTime<Utc>>,
}

impl Window {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        upper: UpperBound,
        now: DateTime<Utc>,
    ) -> Self {
        let end = match upper {
            UpperBound::ConfiguredEnd => Some(end),
            UpperBound::Now => Some(now),
            UpperBound::Unbounded => None,
        };
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && self.end.is_none_or(|end| ts <= end)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    pub selection: Selection,
    pub window: Window,
}

// ─── Output ─────────────────────────────────────────────────────────────────

/// Sum of the events assigned to one bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BinTotals {
    pub amounts: Amounts,
    pub events: usize,
}

/// Wallet counts per balance range for one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Histogram {
    pub buckets: [usize; 4],
}

impl Histogram {
    pub fn total(&self) -> usize {
        self.buckets.iter().sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    /// One entry per bin, in bin order.
    pub per_bin: Vec<BinTotals>,
    /// Running sum of `per_bin` amounts.
    pub cumulative: Vec<Amounts>,
    pub histograms: BTreeMap<Axis, Histogram>,
    /// Sum of all projection balances.
    pub totals: Amounts,
    /// Wallets present in the projection.
    pub wallets: usize,
    /// Events that landed in a bin.
    pub events: usize,
    /// Ledger keys or entries that could not be decoded.
    pub skipped: usize,
}

// ─── Aggregation ────────────────────────────────────────────────────────────

/// Aggregate a ledger snapshot and the balances projection over `bins`.
pub fn aggregate(
    snapshot: &LedgerSnapshot,
    projection: &BalancesProjection,
    bins: &Bins,
    options: &AggregateOptions,
) -> Aggregate {
    let mut per_bin = vec![BinTotals::default(); bins.len()];
    let mut events = 0;

    let mut contribute = |event: &EventRecord| {
        if !options.window.contains(event.timestamp) {
            return;
        }
        let slot = &mut per_bin[bins.assign(event.timestamp).index];
        slot.amounts += event.amounts;
        slot.events += 1;
        events += 1;
    };

    for (_, ledger) in &snapshot.ledgers {
        match options.selection {
            Selection::EveryEvent => ledger.entries().for_each(|(_, event)| contribute(event)),
            Selection::LatestPerWallet => ledger
                .latest_per_wallet()
                .into_values()
                .for_each(|(_, event)| contribute(event)),
        }
    }

    let amounts: Vec<Amounts> = per_bin.iter().map(|bin| bin.amounts).collect();

    Aggregate {
        cumulative: cumulative(&amounts),
        per_bin,
        histograms: histograms(projection),
        totals: projection.totals(),
        wallets: projection.len(),
        events,
        skipped: snapshot.skipped,
    }
}

/// `out[0] = per_bin[0]`, `out[i] = out[i - 1] + per_bin[i]`.
pub fn cumulative(per_bin: &[Amounts]) -> Vec<Amounts> {
    per_bin
        .iter()
        .scan(Amounts::ZERO, |running, amounts| {
            *running += *amounts;
            Some(*running)
        })
        .collect()
}

/// Histogram bucket of a balance; `None` for balances ≤ 0.
pub fn bucket_for(balance: f64) -> Option<usize> {
    if balance.is_nan() || balance <= 0.0 {
        return None;
    }
    Some(BUCKET_BOUNDS.iter().position(|bound| balance <= *bound).unwrap_or(BUCKET_BOUNDS.len()))
}

/// Count wallets per balance bucket for every axis.
pub fn histograms(projection: &BalancesProjection) -> BTreeMap<Axis, Histogram> {
    let mut out: BTreeMap<Axis, Histogram> =
        Axis::ALL.iter().map(|axis| (*axis, Histogram::default())).collect();

    for (_, balance) in projection.iter() {
        for axis in Axis::ALL {
            if let Some(bucket) = bucket_for(balance.get(axis)) {
                if let Some(histogram) = out.get_mut(&axis) {
                    histogram.buckets[bucket] += 1;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::config::parse_instant;
    use tally_storage::models::WalletLedger;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_instant(raw).expect("instant")
    }

    fn event(wallet: &str, anti: f64, photon: f64, ts: &str) -> EventRecord {
        EventRecord {
            wallet: wallet.to_string(),
            amounts: Amounts::new(anti, 0.0, 0.0, photon),
            signature: "sig".to_string(),
            timestamp: at(ts),
        }
    }

    fn ledger(events: Vec<EventRecord>) -> WalletLedger {
        let mut ledger = WalletLedger::default();
        for event in events {
            ledger.append(event);
        }
        ledger
    }

    fn day_bins() -> Bins {
        Bins::build(at("2025-01-01T00:00Z"), at("2025-01-02T00:00Z")).expect("bins")
    }

    fn options(selection: Selection, upper: UpperBound, now: &str) -> AggregateOptions {
        AggregateOptions {
            selection,
            window: Window::new(at("2025-01-01T00:00Z"), at("2025-01-02T00:00Z"), upper, at(now)),
        }
    }

    #[test]
    fn every_event_sums_into_assigned_bins() {
        let snapshot = LedgerSnapshot {
            ledgers: vec![
                ("W1".into(), ledger(vec![
                    event("W1", 10.0, 0.0, "2025-01-01T01:10Z"),
                    event("W1", 5.0, 1.0, "2025-01-01T01:50Z"),
                ])),
                ("W2".into(), ledger(vec![event("W2", -3.0, 2.0, "2025-01-01T05:00Z")])),
            ],
            skipped: 0,
        };
        let bins = day_bins();
        let agg = aggregate(
            &snapshot,
            &BalancesProjection::default(),
            &bins,
            &options(Selection::EveryEvent, UpperBound::ConfiguredEnd, "2025-01-03T00:00Z"),
        );

        assert_eq!(agg.per_bin.len(), bins.len());
        let one_am = bins.assign(at("2025-01-01T01:00Z")).index;
        let five_am = bins.assign(at("2025-01-01T05:00Z")).index;
        assert_eq!(agg.per_bin[one_am].amounts, Amounts::new(15.0, 0.0, 0.0, 1.0));
        assert_eq!(agg.per_bin[one_am].events, 2);
        assert_eq!(agg.per_bin[five_am].amounts, Amounts::new(-3.0, 0.0, 0.0, 2.0));
        assert_eq!(agg.events, 3);
        assert_eq!(agg.cumulative.last().copied(), Some(Amounts::new(12.0, 0.0, 0.0, 3.0)));
    }

    #[test]
    fn latest_per_wallet_counts_each_wallet_once() {
        // One proxy-keyed log holding repeated updates from two wallets.
        let snapshot = LedgerSnapshot {
            ledgers: vec![("bin-query".into(), ledger(vec![
                event("A", 1.0, 0.0, "2025-01-01T02:00Z"),
                event("B", 7.0, 0.0, "2025-01-01T03:00Z"),
                event("A", 4.0, 0.0, "2025-01-01T04:00Z"),
            ]))],
            skipped: 0,
        };
        let bins = day_bins();
        let agg = aggregate(
            &snapshot,
            &BalancesProjection::default(),
            &bins,
            &options(Selection::LatestPerWallet, UpperBound::ConfiguredEnd, "2025-01-03T00:00Z"),
        );

        assert_eq!(agg.events, 2);
        assert_eq!(agg.per_bin[bins.assign(at("2025-01-01T02:00Z")).index].events, 0);
        assert_eq!(agg.per_bin[bins.assign(at("2025-01-01T04:00Z")).index].amounts.anti, 4.0);
        assert_eq!(agg.cumulative.last().map(|a| a.anti), Some(11.0));
    }

    #[test]
    fn window_clips_per_upper_bound() {
        let snapshot = LedgerSnapshot {
            ledgers: vec![("W1".into(), ledger(vec![
                event("W1", 1.0, 0.0, "2024-12-31T23:30Z"),
                event("W1", 2.0, 0.0, "2025-01-01T10:00Z"),
                event("W1", 4.0, 0.0, "2025-01-01T20:00Z"),
                event("W1", 8.0, 0.0, "2025-01-02T00:30Z"),
            ]))],
            skipped: 0,
        };
        let bins = day_bins();
        let projection = BalancesProjection::default();
        let total = |upper| {
            let agg = aggregate(&snapshot, &projection, &bins, &options(
                Selection::EveryEvent,
                upper,
                "2025-01-01T12:00Z",
            ));
            agg.cumulative.last().map(|a| a.anti).unwrap_or_default()
        };

        assert_eq!(total(UpperBound::ConfiguredEnd), 6.0);
        assert_eq!(total(UpperBound::Now), 2.0);
        assert_eq!(total(UpperBound::Unbounded), 14.0);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let window = Window::new(
            at("2025-01-01T00:00Z"),
            at("2025-01-02T00:00Z"),
            UpperBound::ConfiguredEnd,
            at("2025-01-01T00:00Z"),
        );
        assert!(window.contains(at("2025-01-01T00:00Z")));
        assert!(window.contains(at("2025-01-02T00:00Z")));
        assert!(!window.contains(at("2025-01-02T00:01Z")));
        assert!(!window.contains(at("2024-12-31T23:59Z")));
    }

    #[test]
    fn cumulative_is_running_sum() {
        let per_bin = vec![
            Amounts::new(1.0, 0.0, 0.0, 0.0),
            Amounts::ZERO,
            Amounts::new(2.0, 1.0, 0.0, -1.0),
            Amounts::new(-1.0, 0.0, 3.0, 0.0),
        ];
        let running = cumulative(&per_bin);
        assert_eq!(running[0], per_bin[0]);
        for i in 1..per_bin.len() {
            assert_eq!(running[i], running[i - 1] + per_bin[i]);
        }
        assert!(cumulative(&[]).is_empty());
    }

    #[test]
    fn histogram_partitions_positive_balances() {
        assert_eq!(bucket_for(0.0), None);
        assert_eq!(bucket_for(-5.0), None);
        assert_eq!(bucket_for(f64::NAN), None);
        assert_eq!(bucket_for(1.0), Some(0));
        assert_eq!(bucket_for(1e5), Some(0));
        assert_eq!(bucket_for(100_000.5), Some(1));
        assert_eq!(bucket_for(1e6), Some(1));
        assert_eq!(bucket_for(1e7), Some(2));
        assert_eq!(bucket_for(1e9), Some(3));

        let mut projection = BalancesProjection::default();
        projection.overwrite("a", Amounts::new(50.0, 0.0, 2e6, -1.0));
        projection.overwrite("b", Amounts::new(5e5, 0.0, 2e7, 0.0));
        projection.overwrite("c", Amounts::new(0.0, 3.0, 1e5, 0.0));

        let hist = histograms(&projection);
        assert_eq!(hist[&Axis::Anti].buckets, [1, 1, 0, 0]);
        assert_eq!(hist[&Axis::Pro].buckets, [1, 0, 0, 0]);
        assert_eq!(hist[&Axis::Baryon].buckets, [1, 0, 1, 1]);
        assert_eq!(hist[&Axis::Photon].total(), 0);
        for axis in Axis::ALL {
            let positive = projection.iter().filter(|(_, b)| b.get(axis) > 0.0).count();
            assert_eq!(hist[&axis].total(), positive);
        }
    }

    #[test]
    fn snapshot_skips_are_reported_not_fatal() {
        let snapshot = LedgerSnapshot {
            ledgers: vec![("W1".into(), ledger(vec![event("W1", 3.0, 0.0, "2025-01-01T08:00Z")]))],
            skipped: 2,
        };
        let agg = aggregate(
            &snapshot,
            &BalancesProjection::default(),
            &day_bins(),
            &options(Selection::EveryEvent, UpperBound::ConfiguredEnd, "2025-01-03T00:00Z"),
        );
        assert_eq!(agg.skipped, 2);
        assert_eq!(agg.cumulative.last().map(|a| a.anti), Some(3.0));
    }
}
