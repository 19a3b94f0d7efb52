//! Products domain module.
//!
//! Catalogue entries referenced by stock. Pure domain logic: validation,
//! the catalogue query/sort rules and usage summaries (no IO, no HTTP).

pub mod product;
pub mod query;
pub mod usage;

pub use product::{Product, ProductDraft};
pub use query::{PmFilter, ProductQuery, ProductSort, SortBy, SortDir};
pub use usage::ProductUsage;
