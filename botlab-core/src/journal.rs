//! Append-only position journal.
//!
//! Every nonzero quantity change on a position produces exactly one entry, so
//! summing `quantity_change` per position reproduces its quantity history and
//! summing `realized_profit` reproduces the account's realized profit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::OrderFlags;
use crate::domain::{PositionId, Precision, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Open,
    Modify,
    Close,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Precision")]
pub struct JournalEntry<P> {
    pub transaction_id: TransactionId,
    pub time: DateTime<Utc>,
    pub entry_type: EntryType,
    pub flags: OrderFlags,
    pub symbol: String,
    pub position_id: Option<PositionId>,
    /// Signed change of the position quantity (zero for `Abort`).
    pub quantity_change: P,
    pub price: Option<P>,
    pub realized_profit: Option<P>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound = "P: Precision")]
pub struct Journal<P> {
    entries: Vec<JournalEntry<P>>,
}

impl<P: Precision> Journal<P> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub(crate) fn append(&mut self, entry: JournalEntry<P>) {
        debug_assert!(
            self.entries
                .last()
                .map_or(true, |last| last.transaction_id <= entry.transaction_id),
            "journal transaction ids must not go backwards"
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[JournalEntry<P>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn for_position(&self, id: PositionId) -> impl Iterator<Item = &JournalEntry<P>> {
        self.entries.iter().filter(move |e| e.position_id == Some(id))
    }

    pub fn for_transaction(&self, tx: TransactionId) -> impl Iterator<Item = &JournalEntry<P>> {
        self.entries.iter().filter(move |e| e.transaction_id == tx)
    }

    /// Sum of realized profit over every entry.
    pub fn realized_profit(&self) -> P {
        self.entries
            .iter()
            .filter_map(|e| e.realized_profit)
            .fold(P::zero(), |acc, p| acc + p)
    }

    /// Quantity per position reconstructed from the entries alone.
    pub fn replay_quantities(&self) -> BTreeMap<PositionId, P> {
        let mut out = BTreeMap::new();
        for entry in &self.entries {
            if let Some(id) = entry.position_id {
                let q = out.entry(id).or_insert_with(P::zero);
                *q += entry.quantity_change;
            }
        }
        out
    }

    pub fn into_entries(self) -> Vec<JournalEntry<P>> {
        self.entries
    }
}
