//! Read models for the stock and rental listings.
//!
//! Stores hand over joined rows ([`StockView`], [`RentalView`]); the functions
//! here filter, group, sort and paginate them against a location snapshot.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labinv_core::{LocationId, Page, PageRequest, ProductId, RentalId, StockId};
use labinv_locations::LocationTree;
use labinv_products::Product;

use crate::rental::{LoanType, Rental};
use crate::stock::{Stock, StockStatus};

/// A stock row joined with its product.
#[derive(Debug, Clone, PartialEq)]
pub struct StockView {
    pub stock: Stock,
    pub product: Product,
}

/// A rental row joined with its product and the unit's asset tag.
#[derive(Debug, Clone, PartialEq)]
pub struct RentalView {
    pub rental: Rental,
    pub product: Product,
    pub iams_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub name: String,
    pub brand: String,
    pub model: String,
}

impl From<&Product> for ProductSummary {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            brand: p.brand.clone(),
            model: p.model.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRef {
    pub id: LocationId,
    pub label: String,
    pub path: String,
}

impl LocationRef {
    fn resolve(tree: &LocationTree, id: LocationId) -> Self {
        Self {
            id,
            label: tree.get(&id).map(|l| l.label.clone()).unwrap_or_default(),
            path: tree.path_text(&id),
        }
    }
}

/// Status filter for stock listings; defaults to `in_stock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFilter(pub StockStatus);

impl Default for StatusFilter {
    fn default() -> Self {
        Self(StockStatus::InStock)
    }
}

impl StatusFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).map(Self).unwrap_or_default()
    }

    pub fn admits(&self, stock: &Stock) -> bool {
        stock.status() == self.0
    }
}

/// Status plus free-text filter over stock rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockSearch {
    pub status: StatusFilter,
    pub q: Option<String>,
}

impl StockSearch {
    pub fn new(status: StatusFilter, q: Option<&str>) -> Self {
        let q = q.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self { status, q }
    }

    /// Keep rows whose status matches and whose product text, location path,
    /// asset tag or exact stock id matches `q`.
    fn select<'a>(&self, views: &'a [StockView], tree: &LocationTree) -> Vec<&'a StockView> {
        let Some(q) = &self.q else {
            return views.iter().filter(|v| self.status.admits(&v.stock)).collect();
        };
        let needle = q.to_lowercase();
        let path_hits = tree.matching_paths(q);
        let exact_id = q.parse::<StockId>().ok();
        views
            .iter()
            .filter(|v| self.status.admits(&v.stock))
            .filter(|v| {
                let p = &v.product;
                [p.name.as_str(), p.model.as_str(), p.brand.as_str()]
                    .iter()
                    .any(|f| f.to_lowercase().contains(&needle))
                    || path_hits.contains(&v.stock.location_id)
                    || v.stock
                        .iams_id
                        .as_deref()
                        .is_some_and(|tag| tag.to_lowercase().contains(&needle))
                    || exact_id == Some(v.stock.id)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmStockRow {
    pub stock_id: StockId,
    pub iams_id: Option<String>,
    pub product: ProductSummary,
    pub location_id: LocationId,
    pub location_path: Vec<String>,
    pub current_status: StockStatus,
    pub created_at: DateTime<Utc>,
}

/// Property-managed units, one row each.
pub fn pm_rows(
    views: &[StockView],
    tree: &LocationTree,
    search: &StockSearch,
    page: PageRequest,
) -> Page<PmStockRow> {
    let mut rows: Vec<PmStockRow> = search
        .select(views, tree)
        .into_iter()
        .filter(|v| v.product.is_property_managed)
        .map(|v| PmStockRow {
            stock_id: v.stock.id,
            iams_id: v.stock.iams_id.clone(),
            product: ProductSummary::from(&v.product),
            location_id: v.stock.location_id,
            location_path: tree.path(&v.stock.location_id),
            current_status: v.stock.status(),
            created_at: v.stock.created_at,
        })
        .collect();
    rows.sort_by(|a, b| {
        a.product
            .name
            .cmp(&b.product.name)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.stock_id.cmp(&b.stock_id))
    });
    Page::from_vec(rows, page)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonPmGroupRow {
    pub product: ProductSummary,
    pub location_id: LocationId,
    pub location_path: Vec<String>,
    pub quantity: u64,
    pub current_status: StockStatus,
}

/// Non-PM units grouped by product and location.
pub fn non_pm_groups(
    views: &[StockView],
    tree: &LocationTree,
    search: &StockSearch,
    page: PageRequest,
) -> Page<NonPmGroupRow> {
    let mut groups: HashMap<(ProductId, LocationId), NonPmGroupRow> = HashMap::new();
    for v in search
        .select(views, tree)
        .into_iter()
        .filter(|v| !v.product.is_property_managed)
    {
        groups
            .entry((v.product.id, v.stock.location_id))
            .or_insert_with(|| NonPmGroupRow {
                product: ProductSummary::from(&v.product),
                location_id: v.stock.location_id,
                location_path: tree.path(&v.stock.location_id),
                quantity: 0,
                current_status: search.status.0,
            })
            .quantity += 1;
    }
    let mut rows: Vec<NonPmGroupRow> = groups.into_values().collect();
    rows.sort_by(|a, b| {
        a.product
            .name
            .cmp(&b.product.name)
            .then_with(|| a.location_path.cmp(&b.location_path))
            .then(a.product.id.cmp(&b.product.id))
    });
    Page::from_vec(rows, page)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableRow {
    pub stock_id: StockId,
    pub iams_id: Option<String>,
    pub product: ProductSummary,
    pub location: LocationRef,
}

/// PM units that can be borrowed right now, newest first.
pub fn available_rows(views: &[StockView], tree: &LocationTree) -> Vec<AvailableRow> {
    let mut picked: Vec<&StockView> = views
        .iter()
        .filter(|v| v.product.is_property_managed && v.stock.is_available())
        .collect();
    picked.sort_by(|a, b| b.stock.created_at.cmp(&a.stock.created_at));
    picked
        .into_iter()
        .map(|v| AvailableRow {
            stock_id: v.stock.id,
            iams_id: v.stock.iams_id.clone(),
            product: ProductSummary::from(&v.product),
            location: LocationRef::resolve(tree, v.stock.location_id),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortTermRow {
    pub id: RentalId,
    pub stock_id: StockId,
    pub iams_id: Option<String>,
    pub borrower_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub borrower_name: Option<String>,
    pub renter: Option<String>,
    pub loan_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub overdue: bool,
    pub product: ProductSummary,
    pub location: LocationRef,
}

/// Open short-term loans, most recent first. `device_names` maps borrower
/// ids to registered device names.
pub fn short_term_rows(
    rentals: &[RentalView],
    tree: &LocationTree,
    device_names: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Vec<ShortTermRow> {
    let mut open: Vec<&RentalView> = rentals
        .iter()
        .filter(|r| r.rental.is_open() && r.rental.loan_type == LoanType::ShortTerm)
        .collect();
    open.sort_by(|a, b| b.rental.loan_date.cmp(&a.rental.loan_date));
    open.into_iter()
        .map(|r| ShortTermRow {
            id: r.rental.id,
            stock_id: r.rental.stock_id,
            iams_id: r.iams_id.clone(),
            borrower_id: r.rental.borrower.clone(),
            borrower_name: device_names.get(&r.rental.borrower).cloned(),
            renter: r.rental.renter.clone(),
            loan_date: r.rental.loan_date,
            due_date: r.rental.due_date,
            overdue: r.rental.is_overdue(now),
            product: ProductSummary::from(&r.product),
            location: LocationRef::resolve(tree, r.rental.location_id),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLoanRow {
    pub rental_id: RentalId,
    pub stock_id: StockId,
    pub iams_id: Option<String>,
    pub borrower: String,
    pub renter: Option<String>,
    pub loan_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub product: ProductSummary,
    pub location_path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLoanGroupRow {
    pub group_id: String,
    pub product: ProductSummary,
    pub location_id: LocationId,
    pub location_path: Vec<String>,
    pub borrower: String,
    pub renter: String,
    pub quantity: u64,
    /// Earliest due date in the group.
    pub due_date: Option<DateTime<Utc>>,
}

fn open_long_term(rentals: &[RentalView], pm: bool) -> impl Iterator<Item = &RentalView> {
    rentals.iter().filter(move |r| {
        r.rental.is_open()
            && r.rental.loan_type == LoanType::LongTerm
            && r.product.is_property_managed == pm
    })
}

fn haystack_matches(parts: &[&str], needle: &Option<String>) -> bool {
    match needle {
        None => true,
        Some(n) => parts.join(" ").to_lowercase().contains(n.as_str()),
    }
}

fn lower_q(q: Option<&str>) -> Option<String> {
    q.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
}

/// Due date ascending with undated loans last, then product name.
fn by_due_then_name(
    a: (Option<DateTime<Utc>>, &str),
    b: (Option<DateTime<Utc>>, &str),
) -> std::cmp::Ordering {
    match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
    .then_with(|| a.1.cmp(b.1))
}

/// Open long-term loans of PM units.
pub fn open_loans_pm(
    rentals: &[RentalView],
    tree: &LocationTree,
    q: Option<&str>,
    page: PageRequest,
) -> Page<OpenLoanRow> {
    let needle = lower_q(q);
    let mut rows: Vec<OpenLoanRow> = open_long_term(rentals, true)
        .map(|r| OpenLoanRow {
            rental_id: r.rental.id,
            stock_id: r.rental.stock_id,
            iams_id: r.iams_id.clone(),
            borrower: r.rental.borrower.clone(),
            renter: r.rental.renter.clone(),
            loan_date: r.rental.loan_date,
            due_date: r.rental.due_date,
            product: ProductSummary::from(&r.product),
            location_path: tree.path(&r.rental.location_id),
        })
        .filter(|row| {
            let stock_id = row.stock_id.to_string();
            let path = row.location_path.join(" ");
            haystack_matches(
                &[
                    row.borrower.as_str(),
                    row.renter.as_deref().unwrap_or(""),
                    row.product.name.as_str(),
                    row.product.brand.as_str(),
                    row.product.model.as_str(),
                    path.as_str(),
                    stock_id.as_str(),
                    row.iams_id.as_deref().unwrap_or(""),
                ],
                &needle,
            )
        })
        .collect();
    rows.sort_by(|a, b| by_due_then_name((a.due_date, &a.product.name), (b.due_date, &b.product.name)));
    Page::clamped(rows, page)
}

/// Open long-term loans of non-PM units, grouped by product, location,
/// borrower and renter.
pub fn open_loans_non_pm(
    rentals: &[RentalView],
    tree: &LocationTree,
    q: Option<&str>,
    page: PageRequest,
) -> Page<OpenLoanGroupRow> {
    let needle = lower_q(q);
    let mut groups: HashMap<String, OpenLoanGroupRow> = HashMap::new();
    let mut seen_rentals = HashSet::new();
    for r in open_long_term(rentals, false) {
        if !seen_rentals.insert(r.rental.id) {
            continue;
        }
        let renter = r.rental.renter.clone().unwrap_or_default();
        let key = format!(
            "{}::{}::{}::{}",
            r.rental.product_id, r.rental.location_id, r.rental.borrower, renter
        );
        let group = groups.entry(key.clone()).or_insert_with(|| OpenLoanGroupRow {
            group_id: key,
            product: ProductSummary::from(&r.product),
            location_id: r.rental.location_id,
            location_path: tree.path(&r.rental.location_id),
            borrower: r.rental.borrower.clone(),
            renter,
            quantity: 0,
            due_date: None,
        });
        group.quantity += 1;
        group.due_date = match (group.due_date, r.rental.due_date) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
    let mut rows: Vec<OpenLoanGroupRow> = groups
        .into_values()
        .filter(|g| {
            let path = g.location_path.join(" ");
            haystack_matches(
                &[
                    g.borrower.as_str(),
                    g.renter.as_str(),
                    g.product.name.as_str(),
                    g.product.brand.as_str(),
                    g.product.model.as_str(),
                    path.as_str(),
                ],
                &needle,
            )
        })
        .collect();
    rows.sort_by(|a, b| {
        by_due_then_name((a.due_date, &a.product.name), (b.due_date, &b.product.name))
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    Page::clamped(rows, page)
}
