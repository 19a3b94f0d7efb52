//! Application services: the operations behind the HTTP routes.
//!
//! Services own request parsing rules, batch orchestration and the account
//! flows. They talk to storage only through [`LabStore`](crate::store::LabStore).

pub mod accounts;
pub mod error;
pub mod inventory;
pub mod rentals;
pub mod request;

pub use accounts::{AccountService, AuthError, Session, SessionUser, Ticket};
pub use error::{ServiceError, ServiceResult};
pub use inventory::{AddStockReport, InventoryService};
pub use rentals::{RentalService, ReturnSummary, SHORT_TERM_HOURS, SHORT_TERM_RENTER};
pub use request::{
    AddStockRequest, BorrowRequest, DiscardBatchRequest, ExtendRequest, LongTermLoanRequest, LongTermReturnRequest,
    Returner, ShortTermReturnRequest, TransferRequest,
};
