//! Stock lifecycle batches and stock listings.
//!
//! Batches commit one unit at a time through the store; a failing unit is
//! reported in the [`BatchReport`] and does not undo the units before it.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use labinv_core::{LocationId, Page, PageRequest, ProductId, StockId};
use labinv_inventory::{
    AvailableRow, BatchReport, DiscardRequest, LifecycleError, NonPmGroupRow, PmStockRow, ProductKind, Stock,
    StockHistory, StockSearch, group_key,
};
use labinv_inventory::query::{available_rows, non_pm_groups, pm_rows};
use labinv_locations::LocationTree;
use labinv_products::PmFilter;

use super::error::{ServiceError, ServiceResult, item_message};
use super::request::{AddStockRequest, DiscardBatchRequest, TransferRequest, parse_date, parse_field, present};
use crate::store::LabStore;

/// Units created by one add-inventory request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AddStockReport {
    pub pm: usize,
    #[serde(rename = "nonPM")]
    pub non_pm: usize,
}

impl AddStockReport {
    pub fn total(&self) -> usize {
        self.pm + self.non_pm
    }
}

#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn LabStore>,
    root: LocationId,
}

impl InventoryService {
    pub fn new(store: Arc<dyn LabStore>, root: LocationId) -> Self {
        Self { store, root }
    }

    pub fn root(&self) -> LocationId {
        self.root
    }

    pub async fn tree(&self) -> ServiceResult<LocationTree> {
        Ok(LocationTree::new(self.store.list_locations().await?))
    }

    /// Create new units at the root location. All or nothing.
    #[instrument(skip(self, req), err)]
    pub async fn add_stock(&self, req: AddStockRequest) -> ServiceResult<AddStockReport> {
        if req.property_managed.is_empty() && req.non_property_managed.is_empty() {
            return Err(ServiceError::bad_request("NOTHING_TO_ADD", "Nothing to add"));
        }
        if !self.tree().await?.contains(&self.root) {
            return Err(anyhow::anyhow!("root location {} does not exist", self.root).into());
        }

        let raw_ids = req
            .property_managed
            .iter()
            .map(|l| l.product_id.clone())
            .chain(req.non_property_managed.iter().map(|l| l.product_id.clone()));
        let mut invalid = Vec::new();
        for raw in raw_ids {
            let text = raw.unwrap_or_default();
            if text.trim().parse::<ProductId>().is_err() {
                invalid.push(text);
            }
        }
        if !invalid.is_empty() {
            return Err(ServiceError::bad_request("INVALID_ID", "Invalid UUID in productId")
                .with_details(json!({ "invalidIds": invalid })));
        }

        let now = Utc::now();
        let mut errors = Vec::new();
        let mut units = Vec::new();
        let mut report = AddStockReport::default();

        for line in &req.property_managed {
            let id = parse_product(&line.product_id)?;
            match self.store.get_product(id).await? {
                None => errors.push(json!({ "productId": id, "message": "Product not found" })),
                Some(p) if !p.is_property_managed => {
                    errors.push(json!({ "productId": id, "message": "Product is NOT property-managed" }))
                }
                Some(_) => {
                    units.push(Stock::received(StockId::new(), id, self.root, now));
                    report.pm += 1;
                }
            }
        }
        for line in &req.non_property_managed {
            let id = parse_product(&line.product_id)?;
            match self.store.get_product(id).await? {
                None => errors.push(json!({ "productId": id, "message": "Product not found" })),
                Some(p) if p.is_property_managed => {
                    errors.push(json!({ "productId": id, "message": "Product is property-managed" }))
                }
                Some(_) if line.quantity == 0 => {
                    errors.push(json!({ "productId": id, "message": "Invalid quantity" }))
                }
                Some(_) => {
                    units.extend((0..line.quantity).map(|_| Stock::received(StockId::new(), id, self.root, now)));
                    report.non_pm += line.quantity as usize;
                }
            }
        }
        if !errors.is_empty() {
            return Err(ServiceError::bad_request("VALIDATION_FAILED", "Validation failed")
                .with_details(json!({ "errors": errors })));
        }

        self.store.insert_stock(&units).await?;
        info!(pm = report.pm, non_pm = report.non_pm, "stock added");
        Ok(report)
    }

    /// Move PM units one by one and non-PM quantities FIFO, into leaves only.
    #[instrument(skip(self, req), err)]
    pub async fn transfer(&self, req: TransferRequest) -> ServiceResult<BatchReport> {
        if req.property_managed.is_empty() && req.non_property_managed.is_empty() {
            return Err(ServiceError::bad_request("NOTHING_TO_TRANSFER", "No rows to transfer."));
        }
        let tree = self.tree().await?;
        let now = Utc::now();
        let mut report = BatchReport::new();

        for row in &req.property_managed {
            let key = present(&row.stock_id).unwrap_or("(pm:missing)").to_string();
            let (Some(id), Some(from), Some(to)) = (
                parse_field::<StockId>(&row.stock_id),
                parse_field::<LocationId>(&row.from_location),
                parse_field::<LocationId>(&row.to_location),
            ) else {
                report.failed(key, "Missing stockId/from/to");
                continue;
            };
            if !tree.is_leaf(&to) {
                report.failed(key, LifecycleError::DestinationNotLeaf);
                continue;
            }
            match self.store.transfer_stock(id, from, to, now).await {
                Ok(_) => report.ok(id),
                Err(e) => report.failed(id, item_message(&e)),
            }
        }

        for row in &req.non_property_managed {
            let product = parse_field::<ProductId>(&row.product_id);
            let from = row.source().and_then(|s| s.parse::<LocationId>().ok());
            let to = parse_field::<LocationId>(&row.to_location);
            let key = match (product, from) {
                (Some(p), Some(f)) => group_key(p, f),
                _ => format!(
                    "{}@{}",
                    present(&row.product_id).unwrap_or("?"),
                    row.source().unwrap_or("?")
                ),
            };
            let (Some(product), Some(from), Some(to)) = (product, from, to) else {
                report.failed(key, "Missing product/from/to or non-positive quantity");
                continue;
            };
            if row.quantity == 0 {
                report.failed(key, "Missing product/from/to or non-positive quantity");
                continue;
            }
            if !tree.is_leaf(&to) {
                report.failed(key, LifecycleError::DestinationNotLeaf);
                continue;
            }
            if from == to {
                report.failed(key, LifecycleError::SameLocation);
                continue;
            }
            let candidates = self.store.fifo_candidates(product, from, row.quantity as usize).await?;
            if candidates.is_empty() {
                report.failed(key, "No available stock to move");
                continue;
            }
            let mut moved = 0u64;
            for id in candidates {
                match self.store.transfer_stock(id, from, to, now).await {
                    Ok(_) => {
                        moved += 1;
                        report.ok(id);
                    }
                    Err(e) => report.failed(id, item_message(&e)),
                }
            }
            if moved < row.quantity {
                report.failed(key, format!("Only moved {moved}/{}", row.quantity));
            }
        }

        info!(moved = report.succeeded, failed = report.failures(), "transfer batch done");
        Ok(report)
    }

    /// Discard PM units by id and non-PM quantities FIFO.
    #[instrument(skip(self, req), err)]
    pub async fn discard(&self, req: DiscardBatchRequest) -> ServiceResult<BatchReport> {
        let date = match present(&req.date) {
            None => Utc::now(),
            Some(raw) => parse_date(raw).ok_or_else(|| ServiceError::bad_request("INVALID_DATE", "Invalid date"))?,
        };
        if req.property_managed.is_empty() && req.non_property_managed.is_empty() {
            return Err(ServiceError::bad_request("NOTHING_TO_DISCARD", "Nothing to discard"));
        }
        let request = DiscardRequest {
            reason: present(&req.reason).unwrap_or_default().to_string(),
            operator: present(&req.operator).unwrap_or_default().to_string(),
            date,
        };
        let mut report = BatchReport::new();

        for row in &req.property_managed {
            let Some(id) = parse_field::<StockId>(&row.stock_id) else {
                report.failed(present(&row.stock_id).unwrap_or("(pm:missing)"), "Missing stockId");
                continue;
            };
            match self.store.discard_stock(id, ProductKind::PropertyManaged, &request).await {
                Ok(_) => report.ok(id),
                Err(e) => report.failed(id, item_message(&e)),
            }
        }

        for row in &req.non_property_managed {
            let product = parse_field::<ProductId>(&row.product_id);
            let location = parse_field::<LocationId>(&row.location_id);
            let (Some(product), Some(location)) = (product, location) else {
                report.failed("(non-pm:invalid)", "Invalid non-PM row");
                continue;
            };
            let key = group_key(product, location);
            if row.quantity == 0 {
                report.failed(key, "Invalid non-PM row");
                continue;
            }
            let candidates = self.store.fifo_candidates(product, location, row.quantity as usize).await?;
            if candidates.is_empty() {
                report.failed(key, "No available stock to discard");
                continue;
            }
            let mut discarded = 0u64;
            for id in candidates {
                match self
                    .store
                    .discard_stock(id, ProductKind::NonPropertyManaged, &request)
                    .await
                {
                    Ok(_) => {
                        discarded += 1;
                        report.ok(id);
                    }
                    Err(e) => report.failed(id, item_message(&e)),
                }
            }
            if discarded < row.quantity {
                report.failed(key, format!("Requested {}, discarded {discarded}", row.quantity));
            }
        }

        info!(discarded = report.succeeded, failed = report.failures(), "discard batch done");
        Ok(report)
    }

    pub async fn set_iams_id(&self, id: StockId, iams_id: Option<&str>) -> ServiceResult<Stock> {
        let tag = iams_id.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        Ok(self.store.set_iams_id(id, tag).await?)
    }

    pub async fn history(&self, id: StockId) -> ServiceResult<StockHistory> {
        if self.store.get_stock(id).await?.is_none() {
            return Err(LifecycleError::StockNotFound.into());
        }
        Ok(self.store.stock_history(id).await?)
    }

    pub async fn pm_stock(&self, search: &StockSearch, page: PageRequest) -> ServiceResult<Page<PmStockRow>> {
        let views = self.store.stock_views(PmFilter::Pm).await?;
        Ok(pm_rows(&views, &self.tree().await?, search, page))
    }

    pub async fn non_pm_stock(&self, search: &StockSearch, page: PageRequest) -> ServiceResult<Page<NonPmGroupRow>> {
        let views = self.store.stock_views(PmFilter::NonPm).await?;
        Ok(non_pm_groups(&views, &self.tree().await?, search, page))
    }

    /// PM units that can be borrowed right now.
    pub async fn available(&self) -> ServiceResult<Vec<AvailableRow>> {
        let views = self.store.stock_views(PmFilter::Pm).await?;
        Ok(available_rows(&views, &self.tree().await?))
    }
}

fn parse_product(raw: &Option<String>) -> ServiceResult<ProductId> {
    parse_field(raw).ok_or_else(|| ServiceError::bad_request("INVALID_ID", "Invalid UUID in productId"))
}
