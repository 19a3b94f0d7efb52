//! Stock lifecycle transitions and their guards.
//!
//! ```text
//!             lend(short/long)              discard
//!   in_stock ─────────────────▶ on loan     in_stock ─────▶ discarded (terminal)
//!      ▲                           │
//!      └──────── return ◀──────────┘        transfer: in_stock → in_stock @ other leaf
//! ```
//!
//! Each method checks its guards in a fixed order and mutates `self` only when
//! all pass, returning the audit or ledger row the caller must persist in the
//! same transaction.

use chrono::{DateTime, Utc};
use thiserror::Error;

use labinv_core::{DiscardId, LocationId, RentalId, TransferId};

use crate::audit::{DiscardRequest, Discarded, Transfer};
use crate::rental::{LoanType, NewLoan, Rental};
use crate::stock::{Stock, StockStatus};

/// A lifecycle guard refused the transition. Messages are user-facing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Stock not found")]
    StockNotFound,

    #[error("Stock is discarded")]
    Discarded,

    #[error("Stock is not in 'in_stock' (currently {0})")]
    NotInStock(StockStatus),

    #[error("Not a property-managed item")]
    NotPropertyManaged,

    #[error("Item is property-managed; use stockId")]
    PropertyManaged,

    #[error("Destination is not a leaf location")]
    DestinationNotLeaf,

    #[error("Stock not at fromLocation")]
    NotAtLocation,

    #[error("fromLocation equals toLocation")]
    SameLocation,

    #[error("Stock already borrowed")]
    AlreadyBorrowed,

    #[error("Device not registered")]
    DeviceNotRegistered,

    #[error("Rental not found")]
    RentalNotFound,

    #[error("Already returned")]
    AlreadyReturned,

    #[error("Not a short-term rental")]
    NotShortTerm,

    #[error("Forbidden")]
    NotBorrower,

    #[error("Overdue: cannot extend")]
    Overdue,

    #[error("No open long-term rental")]
    NoOpenRental,
}

impl LifecycleError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StockNotFound => "STOCK_NOT_FOUND",
            Self::Discarded => "STOCK_DISCARDED",
            Self::NotInStock(_) => "STOCK_NOT_IN_STOCK",
            Self::NotPropertyManaged => "NOT_PROPERTY_MANAGED",
            Self::PropertyManaged => "PROPERTY_MANAGED",
            Self::DestinationNotLeaf => "DESTINATION_NOT_LEAF",
            Self::NotAtLocation => "STOCK_NOT_AT_LOCATION",
            Self::SameLocation => "SAME_LOCATION",
            Self::AlreadyBorrowed => "ALREADY_BORROWED",
            Self::DeviceNotRegistered => "DEVICE_NOT_REGISTERED",
            Self::RentalNotFound => "RENTAL_NOT_FOUND",
            Self::AlreadyReturned => "ALREADY_RETURNED",
            Self::NotShortTerm => "NOT_SHORT_TERM",
            Self::NotBorrower => "FORBIDDEN",
            Self::Overdue => "OVERDUE",
            Self::NoOpenRental => "NO_OPEN_RENTAL",
        }
    }
}

/// Which tracking mode an operation expects of the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    PropertyManaged,
    NonPropertyManaged,
}

impl ProductKind {
    pub fn of(is_property_managed: bool) -> Self {
        if is_property_managed {
            Self::PropertyManaged
        } else {
            Self::NonPropertyManaged
        }
    }

    pub fn ensure(self, is_property_managed: bool) -> Result<(), LifecycleError> {
        match (self, is_property_managed) {
            (Self::PropertyManaged, false) => Err(LifecycleError::NotPropertyManaged),
            (Self::NonPropertyManaged, true) => Err(LifecycleError::PropertyManaged),
            _ => Ok(()),
        }
    }
}

impl Stock {
    fn ensure_in_stock(&self) -> Result<(), LifecycleError> {
        if self.is_discarded() {
            return Err(LifecycleError::Discarded);
        }
        if self.status != StockStatus::InStock {
            return Err(LifecycleError::NotInStock(self.status));
        }
        Ok(())
    }

    /// Move from `from` to the leaf `to`.
    pub fn transfer(
        &mut self,
        from: LocationId,
        to: LocationId,
        now: DateTime<Utc>,
    ) -> Result<Transfer, LifecycleError> {
        self.ensure_in_stock()?;
        if self.location_id != from {
            return Err(LifecycleError::NotAtLocation);
        }
        if from == to {
            return Err(LifecycleError::SameLocation);
        }
        self.location_id = to;
        Ok(Transfer {
            id: TransferId::new(),
            stock_id: self.id,
            from_location: from,
            to_location: to,
            created_at: now,
        })
    }

    /// Terminal transition. The only place a unit becomes discarded.
    pub fn discard(
        &mut self,
        is_property_managed: bool,
        expect: ProductKind,
        request: &DiscardRequest,
    ) -> Result<Discarded, LifecycleError> {
        if self.is_discarded() {
            return Err(LifecycleError::Discarded);
        }
        expect.ensure(is_property_managed)?;
        self.ensure_in_stock()?;
        self.status = StockStatus::Discarded;
        Ok(Discarded {
            id: DiscardId::new(),
            stock_id: self.id,
            product_id: self.product_id,
            location_id: self.location_id,
            reason: request.reason.clone(),
            operator: request.operator.clone(),
            discard_date: request.date,
        })
    }

    /// Open a loan. `has_open_rental` must come from the ledger inside the
    /// same transaction.
    pub fn lend(
        &mut self,
        is_property_managed: bool,
        expect: ProductKind,
        has_open_rental: bool,
        loan: NewLoan,
    ) -> Result<Rental, LifecycleError> {
        if self.is_discarded() {
            return Err(LifecycleError::Discarded);
        }
        expect.ensure(is_property_managed)?;
        self.ensure_in_stock()?;
        if has_open_rental {
            return Err(LifecycleError::AlreadyBorrowed);
        }
        self.status = match loan.loan_type {
            LoanType::ShortTerm => StockStatus::ShortTerm,
            LoanType::LongTerm => StockStatus::LongTerm,
        };
        Ok(Rental {
            id: RentalId::new(),
            stock_id: self.id,
            product_id: self.product_id,
            location_id: self.location_id,
            borrower: loan.borrower,
            renter: loan.renter,
            loan_type: loan.loan_type,
            loan_date: loan.loan_date,
            due_date: loan.due_date,
            return_date: None,
        })
    }

    /// Close `rental` and put the unit back in stock.
    pub fn receive_return(
        &mut self,
        rental: &mut Rental,
        requester: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        rental.ensure_returnable(requester)?;
        rental.return_date = Some(at);
        if !self.is_discarded() {
            self.status = StockStatus::InStock;
        }
        Ok(())
    }
}
