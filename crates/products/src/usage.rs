use serde::{Deserialize, Serialize};

use labinv_core::ProductId;

/// How much a product is referenced by stock; drives the delete button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUsage {
    pub id: ProductId,
    pub stock_count: u64,
    pub can_delete: bool,
    pub has_short_term: bool,
}

impl ProductUsage {
    pub fn new(id: ProductId, stock_count: u64, short_term_count: u64) -> Self {
        Self {
            id,
            stock_count,
            can_delete: stock_count == 0,
            has_short_term: short_term_count > 0,
        }
    }
}
