//! Persistence boundary for the lab inventory.
//!
//! `LabStore` is implemented twice: an in-memory backend for tests and local
//! development, and a Postgres backend. Both run every lifecycle mutation
//! through the guards in `labinv-inventory`, inside one transaction (or one
//! write lock) together with the audit row it produces.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{IdentityTaken, LabStore, StoreError, StoreResult};
