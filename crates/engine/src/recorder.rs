//! Appends events to wallet ledgers and keeps the balances projection in step.
//!
//! Each call is `get → mutate → put` twice (ledger, then projection) with no
//! locking or compare-and-swap. Concurrent writes for the same wallet may
//! reuse a ledger index or lose a projection update, and a failure between
//! the two writes leaves the ledger ahead of the projection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::config::{RESERVED_KEYS, RepeatPolicy, Settings, UpdateMode};
use tally_core::AppError;
use tally_storage::KvStore;
use tally_storage::models::{Amounts, EventRecord};
use tally_storage::repos;

/// Kind of write; decides the sign applied to the amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Vote,
    Predict,
    Claim,
    Reclaim,
}

impl EventKind {
    pub fn sign(self) -> f64 {
        match self {
            EventKind::Vote | EventKind::Predict => 1.0,
            EventKind::Claim | EventKind::Reclaim => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Vote => "vote",
            EventKind::Predict => "predict",
            EventKind::Claim => "claim",
            EventKind::Reclaim => "reclaim",
        }
    }
}

/// A validated write request.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub wallet: String,
    /// Unsigned as submitted; the kind's sign is applied on record.
    pub amounts: Amounts,
    pub signature: String,
    /// Caller-supplied; the server clock is used when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Projection policy of one deployment.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub projection_key: String,
    pub mode: UpdateMode,
    pub repeat_policy: RepeatPolicy,
}

impl RecorderConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            projection_key: settings.projection_key.clone(),
            mode: settings.update_mode,
            repeat_policy: settings.repeat_policy,
        }
    }
}

/// Confirmation of an appended event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub wallet: String,
    pub kind: EventKind,
    pub index: u64,
}

/// Append `event` to its wallet's ledger and update the projection.
///
/// Delta mode adds `sign * amounts` to the wallet's balance; snapshot mode
/// replaces the balance with the unsigned `amounts`.
pub async fn record_event(
    store: &dyn KvStore,
    config: &RecorderConfig,
    kind: EventKind,
    event: NewEvent,
) -> Result<Receipt, AppError> {
    if RESERVED_KEYS.contains(&event.wallet.as_str()) {
        return Err(AppError::Validation(format!("'{}' is not a wallet", event.wallet)));
    }

    let sign = kind.sign();
    let mut ledger = repos::load_ledger(store, &event.wallet).await?;
    if config.repeat_policy == RepeatPolicy::Reject && !ledger.is_empty() {
        return Err(AppError::Validation(format!("wallet {} has already recorded", event.wallet)));
    }

    let record = EventRecord {
        wallet: event.wallet.clone(),
        amounts: event.amounts.scaled(sign),
        signature: event.signature,
        timestamp: event.timestamp.unwrap_or_else(Utc::now),
    };
    let index = ledger.append(record);
    repos::save_ledger(store, &event.wallet, &ledger).await?;

    let mut projection = repos::load_projection(store, &config.projection_key).await?;
    match config.mode {
        UpdateMode::Delta => projection.apply_delta(&event.wallet, event.amounts.scaled(sign)),
        UpdateMode::Snapshot => projection.overwrite(&event.wallet, event.amounts),
    }
    repos::save_projection(store, &config.projection_key, &projection).await?;

    tracing::info!(
        wallet = %event.wallet,
        kind = kind.as_str(),
        index,
        mode = ?config.mode,
        "Recorded event"
    );

    Ok(Receipt { wallet: event.wallet, kind, index })
}

/// Current projection balance of `wallet`; zeros when unknown.
pub async fn balance_of(
    store: &dyn KvStore,
    projection_key: &str,
    wallet: &str,
) -> Result<Amounts, AppError> {
    let projection = repos::load_projection(store, projection_key).await?;
    Ok(projection.get(wallet))
}

/// Whether `wallet` has at least one ledger entry.
pub async fn has_recorded(store: &dyn KvStore, wallet: &str) -> Result<bool, AppError> {
    if RESERVED_KEYS.contains(&wallet) {
        return Ok(false);
    }
    Ok(!repos::load_ledger(store, wallet).await?.is_empty())
}
