//! `labinv-core`: shared domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, the domain error model and pagination.

pub mod entity;
pub mod error;
pub mod id;
pub mod page;

pub use entity::{Entity, index_by_id};
pub use error::{DomainError, DomainResult};
pub use id::{CodeId, DeviceId, DiscardId, LocationId, ProductId, RentalId, StockId, TransferId, UserId};
pub use page::{Page, PageInfo, PageRequest};
