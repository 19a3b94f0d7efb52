//! Request bodies of the batch and rental operations.
//!
//! Ids stay raw strings here: a malformed id fails only its own row, so
//! parsing happens per item inside the services. Both the current camelCase
//! keys and the older `PropertyManaged` / `ProductId` / `LocationId` keys are
//! accepted.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use labinv_inventory::LoanType;

/// Accepts a number or a numeric string, floors it and clamps at zero.
fn quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    let n = match &value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(if n.is_finite() && n > 0.0 { n.floor() as u64 } else { 0 })
}

/// Trimmed, non-empty.
pub fn present(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a present field; blank or malformed means `None`.
pub fn parse_field<T: core::str::FromStr>(raw: &Option<String>) -> Option<T> {
    present(raw).and_then(|s| s.parse().ok())
}

/// RFC 3339, `YYYY-MM-DDTHH:MM[:SS]` (read as UTC) or a bare date at midnight UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// Add inventory

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStockRequest {
    #[serde(default, alias = "PropertyManaged", alias = "pm")]
    pub property_managed: Vec<AddPmLine>,
    #[serde(default, alias = "NonPropertyManaged", alias = "nonPm")]
    pub non_property_managed: Vec<AddNonPmLine>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPmLine {
    #[serde(default, alias = "ProductId")]
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddNonPmLine {
    #[serde(default, alias = "ProductId")]
    pub product_id: Option<String>,
    #[serde(default, deserialize_with = "quantity")]
    pub quantity: u64,
}

// Transfer

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    #[serde(default, alias = "PropertyManaged", alias = "pm")]
    pub property_managed: Vec<PmTransferRow>,
    #[serde(default, alias = "NonPropertyManaged", alias = "nonPm")]
    pub non_property_managed: Vec<NonPmTransferRow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmTransferRow {
    #[serde(default)]
    pub stock_id: Option<String>,
    #[serde(default)]
    pub from_location: Option<String>,
    #[serde(default)]
    pub to_location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonPmTransferRow {
    #[serde(default, alias = "ProductId")]
    pub product_id: Option<String>,
    #[serde(default)]
    pub from_location: Option<String>,
    /// Older payloads name the source `LocationId`; `fromLocation` wins.
    #[serde(default, rename = "LocationId", alias = "locationId")]
    pub location_id: Option<String>,
    #[serde(default)]
    pub to_location: Option<String>,
    #[serde(default, deserialize_with = "quantity")]
    pub quantity: u64,
}

impl NonPmTransferRow {
    pub fn source(&self) -> Option<&str> {
        present(&self.from_location).or_else(|| present(&self.location_id))
    }
}

// Discard

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardBatchRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, alias = "PropertyManaged", alias = "pm")]
    pub property_managed: Vec<PmStockRef>,
    #[serde(default, alias = "NonPropertyManaged", alias = "nonPm")]
    pub non_property_managed: Vec<NonPmQuantityRow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmStockRef {
    #[serde(default)]
    pub stock_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonPmQuantityRow {
    #[serde(default, alias = "ProductId")]
    pub product_id: Option<String>,
    #[serde(default, alias = "LocationId")]
    pub location_id: Option<String>,
    #[serde(default, deserialize_with = "quantity")]
    pub quantity: u64,
}

// Long-term loans

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongTermLoanRequest {
    #[serde(default)]
    pub loan_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default, alias = "PropertyManaged", alias = "pm")]
    pub property_managed: Vec<LoanPmGroup>,
    #[serde(default, alias = "NonPropertyManaged", alias = "nonPm")]
    pub non_property_managed: Vec<LoanNonPmRow>,
}

/// Several units (`stockIds`) or one (`stockId`) for the same borrower.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanPmGroup {
    #[serde(default)]
    pub stock_ids: Vec<String>,
    #[serde(default)]
    pub stock_id: Option<String>,
    #[serde(default)]
    pub borrower: Option<String>,
    #[serde(default)]
    pub renter: Option<String>,
}

impl LoanPmGroup {
    pub fn units(&self) -> Vec<&str> {
        if self.stock_ids.is_empty() {
            present(&self.stock_id).into_iter().collect()
        } else {
            self.stock_ids.iter().map(|s| s.trim()).collect()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanNonPmRow {
    #[serde(default, alias = "ProductId")]
    pub product_id: Option<String>,
    #[serde(default, alias = "LocationId")]
    pub location_id: Option<String>,
    #[serde(default, deserialize_with = "quantity")]
    pub quantity: u64,
    #[serde(default)]
    pub borrower: Option<String>,
    #[serde(default)]
    pub renter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongTermReturnRequest {
    #[serde(default, alias = "PropertyManaged", alias = "pm")]
    pub property_managed: Vec<PmStockRef>,
    #[serde(default, alias = "NonPropertyManaged", alias = "nonPm")]
    pub non_property_managed: Vec<ReturnNonPmRow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnNonPmRow {
    #[serde(default, alias = "ProductId")]
    pub product_id: Option<String>,
    #[serde(default, alias = "LocationId")]
    pub location_id: Option<String>,
    #[serde(default)]
    pub borrower: Option<String>,
    #[serde(default)]
    pub renter: Option<String>,
    #[serde(default, deserialize_with = "quantity")]
    pub quantity: u64,
}

// Short-term loans

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowRequest {
    #[serde(default)]
    pub stock_id: Option<String>,
    #[serde(default)]
    pub borrower_device_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendRequest {
    #[serde(default)]
    pub rented_item_id: Option<String>,
    #[serde(default)]
    pub add_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortTermReturnRequest {
    #[serde(default)]
    pub rented_item_id: Option<String>,
    #[serde(default)]
    pub return_date: Option<String>,
}

/// Who is returning a short-term loan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Returner {
    Device(String),
    Admin,
}

impl Returner {
    pub fn device(&self) -> Option<&str> {
        match self {
            Self::Device(id) => Some(id),
            Self::Admin => None,
        }
    }
}

pub fn loan_kind_label(kind: LoanType) -> &'static str {
    match kind {
        LoanType::ShortTerm => "short-term",
        LoanType::LongTerm => "long-term",
    }
}
