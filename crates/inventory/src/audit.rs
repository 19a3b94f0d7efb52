//! Append-only audit rows written next to lifecycle transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labinv_core::{DiscardId, LocationId, ProductId, StockId, TransferId};

use crate::rental::Rental;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: TransferId,
    pub stock_id: StockId,
    pub from_location: LocationId,
    pub to_location: LocationId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discarded {
    pub id: DiscardId,
    pub stock_id: StockId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub reason: String,
    pub operator: String,
    pub discard_date: DateTime<Utc>,
}

/// Who discards, why, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardRequest {
    pub reason: String,
    pub operator: String,
    pub date: DateTime<Utc>,
}

/// Everything that ever happened to one unit, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockHistory {
    pub transfers: Vec<Transfer>,
    pub rentals: Vec<Rental>,
    pub discards: Vec<Discarded>,
}

impl StockHistory {
    pub fn sort(&mut self) {
        self.transfers.sort_by_key(|t| (t.created_at, t.id));
        self.rentals.sort_by_key(|r| r.sort_key_fifo());
        self.discards.sort_by_key(|d| (d.discard_date, d.id));
    }
}
