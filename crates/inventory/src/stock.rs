use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use labinv_core::{DomainError, Entity, LocationId, ProductId, StockId};

/// Current lifecycle state of a stock unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    ShortTerm,
    LongTerm,
    Discarded,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
            Self::Discarded => "discarded",
        }
    }
}

impl core::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for StockStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "in_stock" => Ok(Self::InStock),
            "short_term" => Ok(Self::ShortTerm),
            "long_term" => Ok(Self::LongTerm),
            "discarded" => Ok(Self::Discarded),
            other => Err(DomainError::validation(format!("unknown stock status: {other}"))),
        }
    }
}

/// One physical (PM) or interchangeable (non-PM) unit of a product.
///
/// The status is private: it only changes through the lifecycle methods in
/// [`crate::lifecycle`], and the discarded flag is derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stock {
    pub id: StockId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub(crate) status: StockStatus,
    pub iams_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Stock {
    /// A freshly received unit, in stock at `location_id`.
    pub fn received(id: StockId, product_id: ProductId, location_id: LocationId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            product_id,
            location_id,
            status: StockStatus::InStock,
            iams_id: None,
            created_at: now,
        }
    }

    /// Rebuild a unit from persisted columns.
    pub fn restore(
        id: StockId,
        product_id: ProductId,
        location_id: LocationId,
        status: StockStatus,
        iams_id: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            product_id,
            location_id,
            status,
            iams_id,
            created_at,
        }
    }

    pub fn status(&self) -> StockStatus {
        self.status
    }

    pub fn is_discarded(&self) -> bool {
        self.status == StockStatus::Discarded
    }

    /// In stock and not discarded: the only state that can move, lend or discard.
    pub fn is_available(&self) -> bool {
        self.status == StockStatus::InStock
    }
}

impl Entity for Stock {
    type Id = StockId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Serialize for Stock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Stock", 7)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("productId", &self.product_id)?;
        s.serialize_field("locationId", &self.location_id)?;
        s.serialize_field("currentStatus", &self.status)?;
        s.serialize_field("discarded", &self.is_discarded())?;
        s.serialize_field("iamsId", &self.iams_id)?;
        s.serialize_field("createdAt", &self.created_at)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            StockStatus::InStock,
            StockStatus::ShortTerm,
            StockStatus::LongTerm,
            StockStatus::Discarded,
        ] {
            assert_eq!(status.as_str().parse::<StockStatus>().unwrap(), status);
        }
        assert!("lost".parse::<StockStatus>().is_err());
    }

    #[test]
    fn serialized_stock_carries_derived_discarded_flag() {
        let mut stock = Stock::received(StockId::new(), ProductId::new(), LocationId::new(), Utc::now());
        stock.status = StockStatus::Discarded;
        let json = serde_json::to_value(&stock).unwrap();
        assert_eq!(json["currentStatus"], "discarded");
        assert_eq!(json["discarded"], true);
    }
}
