use tally_core::config::RESERVED_KEYS;

use crate::StoreError;
use crate::kv::KvStore;
use crate::models::*;

// ─── Ledger Queries ─────────────────────────────────────────────────────────

/// Load the ledger stored under `key`; empty if the key is absent.
/// Any undecodable entry fails the whole load so a later append never
/// rewrites the ledger without it.
pub async fn load_ledger(store: &dyn KvStore, key: &str) -> Result<WalletLedger, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|source| StoreError::Corrupt { key: key.to_string(), source }),
        None => Ok(WalletLedger::default()),
    }
}

/// Append `record` to the ledger keyed by its wallet. Returns the new index.
///
/// Read-modify-write without compare-and-swap: two concurrent appends to the
/// same wallet can both read count `n` and both write index `n + 1`.
pub async fn append_event(store: &dyn KvStore, record: EventRecord) -> Result<u64, StoreError> {
    let key = record.wallet.clone();
    let mut ledger = load_ledger(store, &key).await?;
    let index = ledger.append(record);
    save_ledger(store, &key, &ledger).await?;
    Ok(index)
}

/// Overwrite the ledger stored under `key`.
pub async fn save_ledger(
    store: &dyn KvStore,
    key: &str,
    ledger: &WalletLedger,
) -> Result<(), StoreError> {
    let encoded = serde_json::to_string(ledger).map_err(StoreError::Encode)?;
    store.put(key, &encoded).await
}

// ─── Projection Queries ─────────────────────────────────────────────────────

/// Load the balances projection under `key`; empty if absent.
pub async fn load_projection(
    store: &dyn KvStore,
    key: &str,
) -> Result<BalancesProjection, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|source| StoreError::Corrupt { key: key.to_string(), source }),
        None => Ok(BalancesProjection::default()),
    }
}

/// Overwrite the balances projection under `key`.
pub async fn save_projection(
    store: &dyn KvStore,
    key: &str,
    projection: &BalancesProjection,
) -> Result<(), StoreError> {
    let encoded = serde_json::to_string(projection).map_err(StoreError::Encode)?;
    store.put(key, &encoded).await
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// List every non-reserved key and decode its ledger best-effort.
///
/// One `get` per key with no pagination, so cost grows linearly with the
/// number of wallets. Keys whose value is not a JSON object and entries
/// that are not valid events are counted in `skipped` instead of failing.
pub async fn load_snapshot(store: &dyn KvStore) -> Result<LedgerSnapshot, StoreError> {
    let mut snapshot = LedgerSnapshot::default();

    for entry in store.list().await? {
        if RESERVED_KEYS.contains(&entry.name.as_str()) {
            continue;
        }
        // Listed but gone: nothing to aggregate.
        let Some(raw) = store.get(&entry.name).await? else {
            continue;
        };
        match WalletLedger::decode_lenient(&raw) {
            Ok((ledger, skipped)) => {
                if skipped > 0 {
                    tracing::warn!(key = %entry.name, skipped, "Skipped undecodable ledger entries");
                }
                snapshot.skipped += skipped;
                snapshot.ledgers.push((entry.name, ledger));
            }
            Err(e) => {
                tracing::warn!(key = %entry.name, error = %e, "Skipped undecodable ledger");
                snapshot.skipped += 1;
            }
        }
    }

    Ok(snapshot)
}
