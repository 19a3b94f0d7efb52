//! Per-item outcome reporting for batch operations.
//!
//! Batches commit one unit at a time, so a request may partially apply. The
//! report says which keys succeeded and why the others did not.

use serde::{Deserialize, Serialize};

use labinv_core::{LocationId, ProductId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    /// Stock id for unit rows, `product@location` for quantity rows.
    pub stock_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub details: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(&mut self, key: impl ToString) {
        self.succeeded += 1;
        self.details.push(ItemOutcome {
            stock_id: key.to_string(),
            ok: true,
            message: None,
        });
    }

    pub fn failed(&mut self, key: impl ToString, message: impl ToString) {
        self.details.push(ItemOutcome {
            stock_id: key.to_string(),
            ok: false,
            message: Some(message.to_string()),
        });
    }

    pub fn failures(&self) -> usize {
        self.details.iter().filter(|d| !d.ok).count()
    }
}

/// Key used in reports for quantity (non-PM) rows.
pub fn group_key(product: ProductId, location: LocationId) -> String {
    format!("{product}@{location}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_only_successes() {
        let mut report = BatchReport::new();
        report.ok("a");
        report.failed("b", "Stock not found");
        report.ok("c");
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failures(), 1);
        let json = serde_json::to_value(&report.details).unwrap();
        assert!(json[0].get("message").is_none());
        assert_eq!(json[1]["message"], "Stock not found");
    }
}
