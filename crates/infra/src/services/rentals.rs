//! Short-term device loans and long-term loan batches.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use labinv_core::{DeviceId, LocationId, Page, PageRequest, ProductId, RentalId, StockId};
use labinv_inventory::query::{open_loans_non_pm, open_loans_pm, short_term_rows};
use labinv_inventory::{
    BatchReport, LifecycleError, LoanType, NewLoan, OpenLoanGroupRow, OpenLoanRow, ProductKind, Rental,
    RentalView, ShortTermRow, group_key,
};
use labinv_locations::LocationTree;

use super::error::{ServiceError, ServiceResult, item_message};
use super::request::{
    BorrowRequest, ExtendRequest, LongTermLoanRequest, LongTermReturnRequest, Returner, ShortTermReturnRequest,
    parse_date, parse_field, present,
};
use crate::store::{LabStore, StoreError};

/// Short-term loans are due three hours after borrowing.
pub const SHORT_TERM_HOURS: i64 = 3;
/// Renter recorded on device loans.
pub const SHORT_TERM_RENTER: &str = "LabAdmin";

/// Outcome of a long-term return batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnSummary {
    pub pm_closed: usize,
    pub non_closed: usize,
    pub non_requested: usize,
    /// Fewer non-PM loans were closed than requested.
    pub partial: bool,
}

#[derive(Clone)]
pub struct RentalService {
    store: Arc<dyn LabStore>,
}

impl RentalService {
    pub fn new(store: Arc<dyn LabStore>) -> Self {
        Self { store }
    }

    /// Lend a PM unit to a registered device.
    ///
    /// `caller_device` is the device the request came from; when present it
    /// must equal the borrowing device.
    #[instrument(skip(self, req), err)]
    pub async fn borrow(&self, req: BorrowRequest, caller_device: Option<&str>) -> ServiceResult<Rental> {
        let (Some(stock), Some(device)) = (present(&req.stock_id), present(&req.borrower_device_id)) else {
            return Err(ServiceError::bad_request("MISSING_FIELDS", "Missing stockId or borrowerDeviceId"));
        };
        if caller_device.is_some_and(|caller| caller != device) {
            return Err(ServiceError::forbidden("Device mismatch"));
        }
        let registered = match device.parse::<DeviceId>() {
            Ok(id) => self.store.get_device(id).await?.is_some(),
            Err(_) => false,
        };
        if !registered {
            return Err(LifecycleError::DeviceNotRegistered.into());
        }
        let stock: StockId = stock.parse().map_err(|_| stock_unavailable())?;

        let now = Utc::now();
        let loan = NewLoan {
            loan_type: LoanType::ShortTerm,
            borrower: device.to_string(),
            renter: Some(SHORT_TERM_RENTER.to_string()),
            loan_date: now,
            due_date: Some(now + Duration::hours(SHORT_TERM_HOURS)),
        };
        let rental = match self.store.lend_stock(stock, ProductKind::PropertyManaged, loan).await {
            Ok(rental) => rental,
            Err(StoreError::NotFound(_) | StoreError::Lifecycle(LifecycleError::StockNotFound)) => {
                return Err(stock_unavailable());
            }
            Err(e) => return Err(e.into()),
        };
        info!(rental = %rental.id, stock = %stock, device, "short-term loan opened");
        Ok(rental)
    }

    /// Push back the due date. Hours are floored, at least one, default three.
    #[instrument(skip(self, req), err)]
    pub async fn extend(&self, req: ExtendRequest, device: Option<&str>) -> ServiceResult<Rental> {
        let device = device
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| ServiceError::forbidden("Missing device id"))?;
        let id = rental_id(&req.rented_item_id)?;
        let hours = req
            .add_hours
            .filter(|h| h.is_finite())
            .map(|h| h.floor() as i64)
            .unwrap_or(SHORT_TERM_HOURS)
            .max(1);
        Ok(self.store.extend_rental(id, device, hours, Utc::now()).await?)
    }

    #[instrument(skip(self, req), err)]
    pub async fn return_short_term(&self, req: ShortTermReturnRequest, returner: Returner) -> ServiceResult<Rental> {
        let id = rental_id(&req.rented_item_id)?;
        let at = optional_date(&req.return_date)?.unwrap_or_else(Utc::now);
        let rental = self
            .store
            .get_rental(id)
            .await?
            .ok_or(LifecycleError::RentalNotFound)?;
        if rental.loan_type != LoanType::ShortTerm {
            return Err(LifecycleError::NotShortTerm.into());
        }
        let rental = self.store.return_rental(id, returner.device(), at).await?;
        info!(rental = %id, admin = returner == Returner::Admin, "short-term loan returned");
        Ok(rental)
    }

    /// Open short-term loans, newest first, optionally only `device`'s.
    pub async fn active(&self, device: Option<&str>, with_names: bool) -> ServiceResult<Vec<ShortTermRow>> {
        let mut rentals = self.store.open_rentals(LoanType::ShortTerm).await?;
        if let Some(device) = device {
            rentals.retain(|r| r.rental.borrower == device);
        }
        let names: HashMap<String, String> = if with_names {
            self.store
                .list_devices()
                .await?
                .into_iter()
                .map(|d| (d.id.to_string(), d.name))
                .collect()
        } else {
            HashMap::new()
        };
        let tree = LocationTree::new(self.store.list_locations().await?);
        Ok(short_term_rows(&rentals, &tree, &names, Utc::now()))
    }

    /// Open long-term loans of PM units and FIFO quantities of non-PM units.
    #[instrument(skip(self, req), err)]
    pub async fn loan(&self, req: LongTermLoanRequest) -> ServiceResult<BatchReport> {
        let loan_date = optional_date(&req.loan_date)?.unwrap_or_else(Utc::now);
        let due_date = optional_date(&req.due_date)?;
        let terms = |borrower: &str, renter: &Option<String>| NewLoan {
            loan_type: LoanType::LongTerm,
            borrower: borrower.to_string(),
            renter: present(renter).map(str::to_string),
            loan_date,
            due_date,
        };
        let mut report = BatchReport::new();

        for group in &req.property_managed {
            let units = group.units();
            let Some(borrower) = present(&group.borrower) else {
                for unit in units {
                    report.failed(unit, "Missing borrower");
                }
                continue;
            };
            if units.is_empty() {
                report.failed("(pm:missing)", "Missing stockId");
            }
            for unit in units {
                let Ok(id) = unit.parse::<StockId>() else {
                    report.failed(unit, LifecycleError::StockNotFound);
                    continue;
                };
                match self
                    .store
                    .lend_stock(id, ProductKind::PropertyManaged, terms(borrower, &group.renter))
                    .await
                {
                    Ok(_) => report.ok(id),
                    Err(e) => report.failed(id, item_message(&e)),
                }
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
            let Some(borrower) = present(&row.borrower) else {
                report.failed(key, "Missing borrower");
                continue;
            };
            if row.quantity == 0 {
                report.failed(key, "Invalid non-PM row");
                continue;
            }
            let candidates = self.store.fifo_candidates(product, location, row.quantity as usize).await?;
            let mut lent = 0u64;
            for id in candidates {
                match self
                    .store
                    .lend_stock(id, ProductKind::NonPropertyManaged, terms(borrower, &row.renter))
                    .await
                {
                    Ok(_) => {
                        lent += 1;
                        report.ok(id);
                    }
                    Err(e) => report.failed(id, item_message(&e)),
                }
            }
            if lent < row.quantity {
                report.failed(key, format!("Only {lent}/{} available", row.quantity));
            }
        }

        info!(lent = report.succeeded, failed = report.failures(), "long-term loan batch done");
        Ok(report)
    }

    /// Close long-term loans: PM by unit, non-PM by group, oldest first.
    #[instrument(skip(self, req), err)]
    pub async fn return_long_term(&self, req: LongTermReturnRequest) -> ServiceResult<ReturnSummary> {
        let now = Utc::now();
        let open = self.store.open_rentals(LoanType::LongTerm).await?;
        let mut summary = ReturnSummary::default();

        for row in &req.property_managed {
            let Some(stock) = parse_field::<StockId>(&row.stock_id) else {
                continue;
            };
            let oldest = open
                .iter()
                .filter(|v| v.product.is_property_managed && v.rental.stock_id == stock)
                .min_by_key(|v| v.rental.sort_key_fifo());
            let Some(view) = oldest else {
                continue;
            };
            if self.close(view.rental.id, now).await {
                summary.pm_closed += 1;
            }
        }

        for row in &req.non_property_managed {
            let (Some(product), Some(location)) = (
                parse_field::<ProductId>(&row.product_id),
                parse_field::<LocationId>(&row.location_id),
            ) else {
                continue;
            };
            if row.quantity == 0 {
                continue;
            }
            summary.non_requested += row.quantity as usize;
            let borrower = row.borrower.as_deref().unwrap_or("").trim();
            let renter = row.renter.as_deref().unwrap_or("").trim();
            let mut matching: Vec<&RentalView> = open
                .iter()
                .filter(|v| {
                    !v.product.is_property_managed
                        && v.rental.product_id == product
                        && v.rental.location_id == location
                        && v.rental.borrower == borrower
                        && v.rental.renter.as_deref().unwrap_or("") == renter
                })
                .collect();
            matching.sort_by_key(|v| v.rental.sort_key_fifo());
            for view in matching.into_iter().take(row.quantity as usize) {
                if self.close(view.rental.id, now).await {
                    summary.non_closed += 1;
                }
            }
        }

        summary.partial = summary.non_closed != summary.non_requested;
        info!(
            pm_closed = summary.pm_closed,
            non_closed = summary.non_closed,
            non_requested = summary.non_requested,
            "long-term return batch done"
        );
        Ok(summary)
    }

    /// Administrative close; a loan closed concurrently just doesn't count.
    async fn close(&self, id: RentalId, at: DateTime<Utc>) -> bool {
        match self.store.return_rental(id, None, at).await {
            Ok(_) => true,
            Err(e) => {
                warn!(rental = %id, error = %e, "long-term return skipped");
                false
            }
        }
    }

    pub async fn open_pm(&self, q: Option<&str>, page: PageRequest) -> ServiceResult<Page<OpenLoanRow>> {
        let rentals = self.store.open_rentals(LoanType::LongTerm).await?;
        let tree = LocationTree::new(self.store.list_locations().await?);
        Ok(open_loans_pm(&rentals, &tree, q, page))
    }

    pub async fn open_non_pm(&self, q: Option<&str>, page: PageRequest) -> ServiceResult<Page<OpenLoanGroupRow>> {
        let rentals = self.store.open_rentals(LoanType::LongTerm).await?;
        let tree = LocationTree::new(self.store.list_locations().await?);
        Ok(open_loans_non_pm(&rentals, &tree, q, page))
    }
}

fn rental_id(raw: &Option<String>) -> ServiceResult<RentalId> {
    match present(raw) {
        None => Err(ServiceError::bad_request("MISSING_FIELDS", "Missing rentedItemId")),
        Some(s) => s.parse().map_err(|_| LifecycleError::RentalNotFound.into()),
    }
}

/// Unknown stock on a borrow is a bad request, not a missing resource.
fn stock_unavailable() -> ServiceError {
    ServiceError::bad_request("STOCK_NOT_AVAILABLE", "Stock not available to borrow")
}

fn optional_date(raw: &Option<String>) -> ServiceResult<Option<DateTime<Utc>>> {
    match present(raw) {
        None => Ok(None),
        Some(s) => parse_date(s)
            .map(Some)
            .ok_or_else(|| ServiceError::bad_request("INVALID_DATE", "Invalid date")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::request::{LoanNonPmRow, LoanPmGroup, PmStockRef, ReturnNonPmRow};
    use crate::store::InMemoryStore;
    use labinv_inventory::{Stock, StockStatus};
    use labinv_products::{Product, ProductDraft};

    struct Fixture {
        svc: RentalService,
        store: Arc<InMemoryStore>,
        root: LocationId,
        device: DeviceId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let root = LocationId::new();
        store.ensure_root(root, "Container Area").await.unwrap();
        let device = DeviceId::new();
        store.upsert_device(device, "Bench tablet", Utc::now()).await.unwrap();
        Fixture {
            svc: RentalService::new(store.clone()),
            store,
            root,
            device,
        }
    }

    async fn stocked(f: &Fixture, pm: bool, units: usize) -> (Product, Vec<StockId>) {
        let draft = ProductDraft {
            name: if pm { "Scope" } else { "Cable" }.into(),
            brand: "Acme".into(),
            model: if pm { "S1" } else { "C1" }.into(),
            is_property_managed: pm,
            ..ProductDraft::default()
        };
        let product = f
            .store
            .insert_product(Product::create(ProductId::new(), draft, Utc::now()).unwrap())
            .await
            .unwrap();
        let t0 = Utc::now();
        let stock: Vec<Stock> = (0..units)
            .map(|i| Stock::received(StockId::new(), product.id, f.root, t0 + Duration::seconds(i as i64)))
            .collect();
        f.store.insert_stock(&stock).await.unwrap();
        (product, stock.iter().map(|s| s.id).collect())
    }

    fn borrow_req(stock: StockId, device: DeviceId) -> BorrowRequest {
        BorrowRequest {
            stock_id: Some(stock.to_string()),
            borrower_device_id: Some(device.to_string()),
        }
    }

    #[tokio::test]
    async fn borrow_extend_return_by_device() {
        let f = fixture().await;
        let (_, units) = stocked(&f, true, 1).await;
        let me = f.device.to_string();

        let rental = f.svc.borrow(borrow_req(units[0], f.device), Some(&me)).await.unwrap();
        assert_eq!(rental.renter.as_deref(), Some(SHORT_TERM_RENTER));
        let due = rental.due_date.unwrap();
        assert_eq!(due - rental.loan_date, Duration::hours(SHORT_TERM_HOURS));

        let again = f.svc.borrow(borrow_req(units[0], f.device), None).await.unwrap_err();
        assert!(matches!(again, ServiceError::Lifecycle(LifecycleError::NotInStock(_))));

        let extended = f
            .svc
            .extend(
                ExtendRequest { rented_item_id: Some(rental.id.to_string()), add_hours: Some(0.4) },
                Some(&me),
            )
            .await
            .unwrap();
        assert_eq!(extended.due_date.unwrap() - due, Duration::hours(1));

        let other = DeviceId::new().to_string();
        let req = || ShortTermReturnRequest { rented_item_id: Some(rental.id.to_string()), return_date: None };
        let denied = f.svc.return_short_term(req(), Returner::Device(other)).await.unwrap_err();
        assert!(matches!(denied, ServiceError::Forbidden(_)));

        f.svc.return_short_term(req(), Returner::Device(me)).await.unwrap();
        let unit = f.store.get_stock(units[0]).await.unwrap().unwrap();
        assert_eq!(unit.status(), StockStatus::InStock);
    }

    #[tokio::test]
    async fn borrow_requires_matching_registered_device() {
        let f = fixture().await;
        let (_, units) = stocked(&f, true, 1).await;
        let err = f
            .svc
            .borrow(borrow_req(units[0], f.device), Some("someone-else"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(m) if m == "Device mismatch"));

        let err = f.svc.borrow(borrow_req(units[0], DeviceId::new()), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Device not registered");
    }

    #[tokio::test]
    async fn borrowing_unknown_stock_is_a_bad_request() {
        let f = fixture().await;
        for stock in [StockId::new().to_string(), "not-a-uuid".to_string()] {
            let req = BorrowRequest {
                stock_id: Some(stock),
                borrower_device_id: Some(f.device.to_string()),
            };
            let err = f.svc.borrow(req, None).await.unwrap_err();
            assert!(
                matches!(err, ServiceError::BadRequest { code: "STOCK_NOT_AVAILABLE", .. }),
                "got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn non_pm_units_cannot_be_borrowed_short_term() {
        let f = fixture().await;
        let (_, units) = stocked(&f, false, 1).await;
        let err = f.svc.borrow(borrow_req(units[0], f.device), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Not a property-managed item");
    }

    #[tokio::test]
    async fn active_lists_device_names_on_request() {
        let f = fixture().await;
        let (_, units) = stocked(&f, true, 2).await;
        for unit in &units {
            f.svc.borrow(borrow_req(*unit, f.device), None).await.unwrap();
        }
        let rows = f.svc.active(None, true).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].borrower_name.as_deref(), Some("Bench tablet"));
        assert!(f.svc.active(Some("nobody"), false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn long_term_loan_and_group_return() {
        let f = fixture().await;
        let (scope, scopes) = stocked(&f, true, 1).await;
        let (cable, _) = stocked(&f, false, 3).await;

        let report = f
            .svc
            .loan(LongTermLoanRequest {
                loan_date: None,
                due_date: Some("2030-01-01".into()),
                property_managed: vec![LoanPmGroup {
                    stock_ids: vec![scopes[0].to_string()],
                    stock_id: None,
                    borrower: Some("amy".into()),
                    renter: None,
                }],
                non_property_managed: vec![LoanNonPmRow {
                    product_id: Some(cable.id.to_string()),
                    location_id: Some(f.root.to_string()),
                    quantity: 4,
                    borrower: Some("amy".into()),
                    renter: Some("lab".into()),
                }],
            })
            .await
            .unwrap();
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.details.last().unwrap().message.as_deref(), Some("Only 3/4 available"));

        let open = f.svc.open_non_pm(None, PageRequest::default()).await.unwrap();
        assert_eq!(open.items.len(), 1);
        assert_eq!(open.items[0].quantity, 3);
        let open_pm = f.svc.open_pm(Some("amy"), PageRequest::default()).await.unwrap();
        assert_eq!(open_pm.items[0].product.id, scope.id);

        let summary = f
            .svc
            .return_long_term(LongTermReturnRequest {
                property_managed: vec![PmStockRef { stock_id: Some(scopes[0].to_string()) }],
                non_property_managed: vec![ReturnNonPmRow {
                    product_id: Some(cable.id.to_string()),
                    location_id: Some(f.root.to_string()),
                    borrower: Some(" amy ".into()),
                    renter: Some("lab".into()),
                    quantity: 5,
                }],
            })
            .await
            .unwrap();
        assert_eq!(
            summary,
            ReturnSummary { pm_closed: 1, non_closed: 3, non_requested: 5, partial: true }
        );
        assert_eq!(f.store.active_stock_counts().await.unwrap().get(&f.root), Some(&4));
        assert!(f.svc.open_non_pm(None, PageRequest::default()).await.unwrap().items.is_empty());
    }
}
