use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use labinv_core::{DomainError, Entity, LocationId, ProductId, RentalId, StockId};

use crate::lifecycle::LifecycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanType {
    ShortTerm,
    LongTerm,
}

impl LoanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }
}

impl core::str::FromStr for LoanType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "short_term" => Ok(Self::ShortTerm),
            "long_term" => Ok(Self::LongTerm),
            other => Err(DomainError::validation(format!("unknown loan type: {other}"))),
        }
    }
}

/// Terms of a loan about to be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoan {
    pub loan_type: LoanType,
    pub borrower: String,
    pub renter: Option<String>,
    pub loan_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
}

/// Rental ledger row. `return_date == None` means the loan is outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rental {
    pub id: RentalId,
    pub stock_id: StockId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub borrower: String,
    pub renter: Option<String>,
    pub loan_type: LoanType,
    pub loan_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub return_date: Option<DateTime<Utc>>,
}

impl Entity for Rental {
    type Id = RentalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Rental {
    pub fn is_open(&self) -> bool {
        self.return_date.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due_date.is_some_and(|due| due < now)
    }

    /// Push the due date of an open short-term loan back by `hours`.
    ///
    /// Only the borrowing device may extend, and never once overdue.
    pub fn extend(&mut self, device: &str, hours: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>, LifecycleError> {
        if !self.is_open() {
            return Err(LifecycleError::AlreadyReturned);
        }
        if self.loan_type != LoanType::ShortTerm {
            return Err(LifecycleError::NotShortTerm);
        }
        if self.borrower != device {
            return Err(LifecycleError::NotBorrower);
        }
        if self.is_overdue(now) {
            return Err(LifecycleError::Overdue);
        }
        let due = self.due_date.unwrap_or(now) + Duration::hours(hours.max(1));
        self.due_date = Some(due);
        Ok(due)
    }

    /// `requester == None` is an administrative return and skips the borrower check.
    pub fn ensure_returnable(&self, requester: Option<&str>) -> Result<(), LifecycleError> {
        if !self.is_open() {
            return Err(LifecycleError::AlreadyReturned);
        }
        match requester {
            Some(device) if device != self.borrower => Err(LifecycleError::NotBorrower),
            _ => Ok(()),
        }
    }

    pub fn sort_key_fifo(&self) -> (DateTime<Utc>, RentalId) {
        (self.loan_date, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_term(borrower: &str, due_in_hours: i64) -> Rental {
        let now = Utc::now();
        Rental {
            id: RentalId::new(),
            stock_id: StockId::new(),
            product_id: ProductId::new(),
            location_id: LocationId::new(),
            borrower: borrower.into(),
            renter: Some("LabAdmin".into()),
            loan_type: LoanType::ShortTerm,
            loan_date: now,
            due_date: Some(now + Duration::hours(due_in_hours)),
            return_date: None,
        }
    }

    #[test]
    fn extend_adds_hours_to_due_date() {
        let mut r = short_term("dev-1", 1);
        let before = r.due_date.unwrap();
        let after = r.extend("dev-1", 3, Utc::now()).unwrap();
        assert_eq!(after - before, Duration::hours(3));
    }

    #[test]
    fn extend_guards() {
        let now = Utc::now();
        assert_eq!(short_term("dev-1", 1).extend("dev-2", 3, now), Err(LifecycleError::NotBorrower));
        assert_eq!(short_term("dev-1", -1).extend("dev-1", 3, now), Err(LifecycleError::Overdue));

        let mut returned = short_term("dev-1", 1);
        returned.return_date = Some(now);
        assert_eq!(returned.extend("dev-1", 3, now), Err(LifecycleError::AlreadyReturned));

        let mut long = short_term("dev-1", 1);
        long.loan_type = LoanType::LongTerm;
        assert_eq!(long.extend("dev-1", 3, now), Err(LifecycleError::NotShortTerm));
    }

    #[test]
    fn admin_return_skips_borrower_check() {
        let r = short_term("dev-1", 1);
        assert!(r.ensure_returnable(None).is_ok());
        assert_eq!(r.ensure_returnable(Some("dev-2")), Err(LifecycleError::NotBorrower));
    }
}
