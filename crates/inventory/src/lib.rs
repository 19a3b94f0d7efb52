//! Inventory domain module: the stock lifecycle.
//!
//! Stock is created at the root location, moved between leaf locations, lent
//! and returned through the rental ledger, and finally discarded. Every guard
//! for those transitions lives here, so the in-memory and Postgres stores run
//! exactly the same checks inside their transactions.
//!
//! This crate contains business rules only (no IO, no HTTP, no storage).

pub mod audit;
pub mod batch;
pub mod device;
pub mod lifecycle;
pub mod query;
pub mod rental;
pub mod stock;

pub use audit::{DiscardRequest, Discarded, StockHistory, Transfer};
pub use batch::{BatchReport, ItemOutcome, group_key};
pub use device::{Device, validate_device_name};
pub use lifecycle::{LifecycleError, ProductKind};
pub use query::{
    AvailableRow, NonPmGroupRow, OpenLoanGroupRow, OpenLoanRow, PmStockRow, ProductSummary,
    RentalView, ShortTermRow, StatusFilter, StockSearch, StockView,
};
pub use rental::{LoanType, NewLoan, Rental};
pub use stock::{Stock, StockStatus};
