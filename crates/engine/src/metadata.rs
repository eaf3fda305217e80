use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::{AppError, Settings};
use tally_storage::KvStore;
use tally_storage::models::{Amounts, Axis};
use tally_storage::repos;

use crate::aggregate::{self, Aggregate, AggregateOptions, BUCKET_LABELS, Window};
use crate::binning::{Bins, Granularity};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: Granularity,
    pub mints: Vec<String>,
}

/// One bin as shown to the front end.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinView {
    pub index: usize,
    pub start: DateTime<Utc>,
    pub label: String,
    pub totals: Amounts,
    pub events: usize,
    pub cumulative: Amounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeCount {
    pub range: &'static str,
    pub wallets: usize,
}

/// Full payload of the metadata endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub campaign: Campaign,
    pub bins: Vec<BinView>,
    pub histograms: BTreeMap<Axis, Vec<RangeCount>>,
    pub totals: Amounts,
    pub wallets: usize,
    pub events: usize,
    /// Ledger keys or entries left out because they could not be decoded.
    pub skipped: usize,
}

/// Shape an aggregate into the response payload.
pub fn build_metadata(settings: &Settings, bins: &Bins, aggregate: Aggregate) -> Metadata {
    let views = bins
        .iter()
        .zip(aggregate.per_bin.iter().zip(aggregate.cumulative.iter()))
        .map(|(bin, (totals, cumulative))| BinView {
            index: bin.index,
            start: bin.start,
            label: bins.label(bin),
            totals: totals.amounts,
            events: totals.events,
            cumulative: *cumulative,
        })
        .collect();

    let histograms = aggregate
        .histograms
        .iter()
        .map(|(axis, histogram)| {
            let counts = BUCKET_LABELS
                .iter()
                .zip(histogram.buckets.iter())
                .map(|(range, wallets)| RangeCount { range: *range, wallets: *wallets })
                .collect();
            (*axis, counts)
        })
        .collect();

    Metadata {
        campaign: Campaign {
            start: settings.start_time,
            end: settings.end_time,
            granularity: bins.granularity(),
            mints: settings.mint_addresses.clone(),
        },
        bins: views,
        histograms,
        totals: aggregate.totals,
        wallets: aggregate.wallets,
        events: aggregate.events,
        skipped: aggregate.skipped,
    }
}

/// Scan the store and build the metadata payload as of `now`.
pub async fn collect_metadata(
    store: &dyn KvStore,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<Metadata, AppError> {
    let bins = Bins::build(settings.start_time, settings.end_time)?;

    let snapshot = repos::load_snapshot(store)
        .await
        .map_err(|e| AppError::Aggregation(format!("ledger scan failed: {e}")))?;
    let projection = repos::load_projection(store, &settings.projection_key)
        .await
        .map_err(|e| AppError::Aggregation(format!("projection load failed: {e}")))?;

    let options = AggregateOptions {
        selection: settings.selection,
        window: Window::new(settings.start_time, settings.end_time, settings.upper_bound, now),
    };
    let aggregate = aggregate::aggregate(&snapshot, &projection, &bins, &options);

    tracing::debug!(
        ledgers = snapshot.ledgers.len(),
        events = aggregate.events,
        skipped = aggregate.skipped,
        bins = bins.len(),
        "Aggregated ledger snapshot"
    );

    Ok(build_metadata(settings, &bins, aggregate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::config::{RepeatPolicy, Selection, UpdateMode, UpperBound, parse_instant};
    use tally_storage::MemoryKvStore;

    use crate::recorder::{EventKind, NewEvent, RecorderConfig, record_event};

    fn settings() -> Settings {
        Settings::from_lookup(|name| match name {
            "START_TIME" => Some("2025-01-01T00:00Z".into()),
            "END_TIME" => Some("2025-01-02T00:00Z".into()),
            "MINT_ADDRESSES" => Some("mintA".into()),
            _ => None,
        })
        .expect("settings")
    }

    #[tokio::test]
    async fn metadata_survives_corrupt_ledger_key() {
        let settings = settings();
        let store = MemoryKvStore::new();
        let config = RecorderConfig::from_settings(&settings);

        for (wallet, anti, ts) in [
            ("W1", 200_000.0, "2025-01-01T03:15Z"),
            ("W2", 50.0, "2025-01-01T03:45Z"),
            ("W2", 25.0, "2025-01-01T09:00Z"),
        ] {
            let event = NewEvent {
                wallet: wallet.into(),
                amounts: Amounts::new(anti, 0.0, 0.0, 0.0),
                signature: "sig".into(),
                timestamp: Some(parse_instant(ts).expect("ts")),
            };
            record_event(&store, &config, EventKind::Vote, event).await.expect("record");
        }
        store.put("W3", "{\"1\": oops").await.expect("put");

        let now = parse_instant("2025-01-05T00:00Z").expect("now");
        let metadata = collect_metadata(&store, &settings, now).await.expect("metadata");

        assert_eq!(metadata.bins.len(), 27);
        assert_eq!(metadata.skipped, 1);
        assert_eq!(metadata.events, 3);
        assert_eq!(metadata.wallets, 2);
        assert_eq!(metadata.totals.anti, 200_075.0);
        assert_eq!(metadata.campaign.mints, vec!["mintA"]);

        let three_am = metadata.bins.iter().find(|b| b.label == "2025-01-01 03:00").expect("bin");
        assert_eq!(three_am.events, 2);
        assert_eq!(three_am.totals.anti, 200_050.0);
        assert_eq!(metadata.bins.last().map(|b| b.cumulative.anti), Some(200_075.0));

        let anti = &metadata.histograms[&Axis::Anti];
        assert_eq!(anti[0].wallets, 1);
        assert_eq!(anti[1].wallets, 1);
        assert_eq!(anti[1].range, "100K-1M");
    }

    #[tokio::test]
    async fn events_ahead_of_now_land_in_their_own_bin() {
        let settings = settings();
        let store = MemoryKvStore::new();
        let config = RecorderConfig::from_settings(&settings);

        for ts in ["2025-01-01T09:30Z", "2025-01-01T20:00Z", "2025-01-02T00:00Z"] {
            let event = NewEvent {
                wallet: "W1".into(),
                amounts: Amounts::new(1.0, 0.0, 0.0, 0.0),
                signature: "sig".into(),
                timestamp: Some(parse_instant(ts).expect("ts")),
            };
            record_event(&store, &config, EventKind::Vote, event).await.expect("record");
        }

        let now = parse_instant("2025-01-01T10:20Z").expect("now");
        let metadata = collect_metadata(&store, &settings, now).await.expect("metadata");
        assert_eq!(metadata.bins.len(), 27);
        assert_eq!(metadata.events, 3);

        for label in ["2025-01-01 09:00", "2025-01-01 20:00", "2025-01-02 00:00"] {
            let bin = metadata.bins.iter().find(|b| b.label == label).expect(label);
            assert_eq!(bin.events, 1, "{label}");
        }

        let clipped = Settings { upper_bound: UpperBound::Now, ..settings.clone() };
        let metadata = collect_metadata(&store, &clipped, now).await.expect("metadata");
        assert_eq!(metadata.bins.len(), 27);
        assert_eq!(metadata.events, 1);
    }

    #[tokio::test]
    async fn metadata_of_empty_store_is_all_zero() {
        let settings = Settings {
            selection: Selection::LatestPerWallet,
            upper_bound: UpperBound::Now,
            update_mode: UpdateMode::Snapshot,
            repeat_policy: RepeatPolicy::Reject,
            ..settings()
        };
        let store = MemoryKvStore::new();
        let now = parse_instant("2025-01-01T05:30Z").expect("now");

        let metadata = collect_metadata(&store, &settings, now).await.expect("metadata");
        assert_eq!(metadata.bins.len(), 27);
        assert!(metadata.bins.iter().all(|b| b.events == 0 && b.cumulative == Amounts::ZERO));
        assert_eq!(metadata.wallets, 0);
        assert!(metadata.histograms.values().all(|h| h.iter().all(|r| r.wallets == 0)));

        let json = serde_json::to_value(&metadata).expect("json");
        assert_eq!(json["campaign"]["granularity"], "hour");
        assert!(json["histograms"]["photon"].is_array());
    }
}
