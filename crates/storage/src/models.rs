use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Neg};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Amounts ────────────────────────────────────────────────────────────────

/// One of the four token dimensions tracked per wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Anti,
    Pro,
    Baryon,
    Photon,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::Anti, Axis::Pro, Axis::Baryon, Axis::Photon];

    pub fn name(self) -> &'static str {
        match self {
            Axis::Anti => "anti",
            Axis::Pro => "pro",
            Axis::Baryon => "baryon",
            Axis::Photon => "photon",
        }
    }
}

/// Signed token amounts across the four axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Amounts {
    #[serde(default)]
    pub anti: f64,
    #[serde(default)]
    pub pro: f64,
    #[serde(default)]
    pub baryon: f64,
    #[serde(default)]
    pub photon: f64,
}

impl Amounts {
    pub const ZERO: Amounts = Amounts { anti: 0.0, pro: 0.0, baryon: 0.0, photon: 0.0 };

    pub fn new(anti: f64, pro: f64, baryon: f64, photon: f64) -> Self {
        Self { anti, pro, baryon, photon }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Anti => self.anti,
            Axis::Pro => self.pro,
            Axis::Baryon => self.baryon,
            Axis::Photon => self.photon,
        }
    }

    /// Every axis multiplied by `sign` (+1 or -1).
    pub fn scaled(self, sign: f64) -> Self {
        Self {
            anti: self.anti * sign,
            pro: self.pro * sign,
            baryon: self.baryon * sign,
            photon: self.photon * sign,
        }
    }

    pub fn is_finite(&self) -> bool {
        Axis::ALL.iter().all(|axis| self.get(*axis).is_finite())
    }
}

impl Add for Amounts {
    type Output = Amounts;

    fn add(self, rhs: Amounts) -> Amounts {
        Amounts {
            anti: self.anti + rhs.anti,
            pro: self.pro + rhs.pro,
            baryon: self.baryon + rhs.baryon,
            photon: self.photon + rhs.photon,
        }
    }
}

impl AddAssign for Amounts {
    fn add_assign(&mut self, rhs: Amounts) {
        *self = *self + rhs;
    }
}

impl Neg for Amounts {
    type Output = Amounts;

    fn neg(self) -> Amounts {
        self.scaled(-1.0)
    }
}

// ─── Event ──────────────────────────────────────────────────────────────────

/// An immutable vote/predict/claim record as stored in a wallet ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub wallet: String,
    #[serde(flatten)]
    pub amounts: Amounts,
    /// Opaque; never verified.
    pub signature: String,
    /// Caller-assigned instant.
    #[serde(with = "instant")]
    pub timestamp: DateTime<Utc>,
}

mod instant {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        tally_core::config::parse_instant(&raw).map_err(D::Error::custom)
    }
}

// ─── Wallet Ledger ──────────────────────────────────────────────────────────

/// Append-only event log of one key, indexed from 1.
///
/// Serialized as a JSON object whose keys are the string-typed sequence
/// indices, e.g. `{"1": {...}, "2": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletLedger {
    entries: BTreeMap<u64, EventRecord>,
}

impl WalletLedger {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index the next appended event will receive: one past the highest
    /// stored index, so a ledger with gaps never has an entry overwritten.
    pub fn next_index(&self) -> u64 {
        let highest = self.entries.keys().next_back().copied().unwrap_or(0);
        highest.max(self.entries.len() as u64) + 1
    }

    /// Append `record` at the next index and return that index.
    pub fn append(&mut self, record: EventRecord) -> u64 {
        let index = self.next_index();
        self.entries.insert(index, record);
        index
    }

    /// Entries in ascending index order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, &EventRecord)> {
        self.entries.iter().map(|(index, record)| (*index, record))
    }

    pub fn latest(&self) -> Option<(u64, &EventRecord)> {
        self.entries.iter().next_back().map(|(index, record)| (*index, record))
    }

    /// Highest-index entry satisfying `predicate`.
    pub fn latest_matching<P>(&self, mut predicate: P) -> Option<(u64, &EventRecord)>
    where
        P: FnMut(&EventRecord) -> bool,
    {
        self.entries
            .iter()
            .rev()
            .find(|(_, record)| predicate(record))
            .map(|(index, record)| (*index, record))
    }

    /// Latest entry per distinct `wallet` field, ordered by wallet.
    pub fn latest_per_wallet(&self) -> BTreeMap<&str, (u64, &EventRecord)> {
        let mut latest = BTreeMap::new();
        for (index, record) in self.entries() {
            // Ascending iteration: later indices overwrite earlier ones.
            latest.insert(record.wallet.as_str(), (index, record));
        }
        latest
    }

    /// Decode a stored ledger, dropping entries that are not valid events or
    /// whose index is not a positive integer. Returns the ledger and the
    /// number of dropped entries; fails only if `raw` is not a JSON object.
    pub fn decode_lenient(raw: &str) -> Result<(Self, usize), serde_json::Error> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)?;
        let mut ledger = Self::default();
        let mut skipped = 0;
        for (key, value) in object {
            let index = key.parse::<u64>().ok().filter(|index| *index > 0);
            let record = serde_json::from_value::<EventRecord>(value).ok();
            match (index, record) {
                (Some(index), Some(record)) => {
                    ledger.entries.insert(index, record);
                }
                _ => skipped += 1,
            }
        }
        Ok((ledger, skipped))
    }
}

// ─── Balances Projection ────────────────────────────────────────────────────

/// Running per-wallet totals, stored as one record under a reserved key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BalancesProjection {
    balances: BTreeMap<String, Amounts>,
}

impl BalancesProjection {
    /// Balance of `wallet`, zeros when unknown.
    pub fn get(&self, wallet: &str) -> Amounts {
        self.balances.get(wallet).copied().unwrap_or_default()
    }

    /// `balance += delta`, starting from zero for new wallets.
    pub fn apply_delta(&mut self, wallet: &str, delta: Amounts) {
        *self.balances.entry(wallet.to_string()).or_default() += delta;
    }

    /// `balance = amounts`, discarding prior state.
    pub fn overwrite(&mut self, wallet: &str, amounts: Amounts) {
        self.balances.insert(wallet.to_string(), amounts);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Amounts)> {
        self.balances.iter().map(|(wallet, amounts)| (wallet.as_str(), amounts))
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Sum of every wallet's balance per axis.
    pub fn totals(&self) -> Amounts {
        self.balances.values().fold(Amounts::ZERO, |acc, amounts| acc + *amounts)
    }
}

// ─── Ledger Snapshot ────────────────────────────────────────────────────────

/// Every ledger in a namespace, decoded best-effort.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    /// `(key, ledger)` pairs in key order.
    pub ledgers: Vec<(String, WalletLedger)>,
    /// Keys or entries that could not be decoded.
    pub skipped: usize,
}

impl LedgerSnapshot {
    pub fn event_count(&self) -> usize {
        self.ledgers.iter().map(|(_, ledger)| ledger.len()).sum()
    }
}
