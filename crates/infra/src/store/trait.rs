use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use labinv_auth::{User, VerificationCode, VerificationPurpose};
use labinv_core::{CodeId, DeviceId, DomainError, LocationId, ProductId, RentalId, StockId, UserId};
use labinv_inventory::{
    Device, DiscardRequest, Discarded, LifecycleError, LoanType, NewLoan, ProductKind, Rental, RentalView,
    Stock, StockHistory, StockView, Transfer,
};
use labinv_locations::{Location, TreeError, TreeNodeInput, TreeSavePlan};
use labinv_products::{PmFilter, Product, ProductDraft, ProductUsage};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("unexpected store error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

/// Which half of a signup identity is already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityTaken {
    pub username: bool,
    pub email: bool,
}

impl IdentityTaken {
    pub fn any(&self) -> bool {
        self.username || self.email
    }
}

/// Everything the services need from storage.
///
/// Lifecycle methods (`transfer_stock`, `discard_stock`, `lend_stock`,
/// `extend_rental`, `return_rental`) re-read the unit inside their
/// transaction and apply the domain guard there; a guard failure surfaces as
/// `StoreError::Lifecycle` and leaves nothing written.
#[async_trait]
pub trait LabStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    // Products

    async fn list_products(&self) -> StoreResult<Vec<Product>>;
    async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>>;
    /// `Conflict` when `(brand, model)` is taken.
    async fn insert_product(&self, product: Product) -> StoreResult<Product>;
    async fn update_product(&self, id: ProductId, draft: ProductDraft) -> StoreResult<Product>;
    /// `Conflict` while any stock row references the product.
    async fn delete_product(&self, id: ProductId) -> StoreResult<()>;
    async fn product_usage(&self, ids: &[ProductId]) -> StoreResult<Vec<ProductUsage>>;

    // Locations

    async fn list_locations(&self) -> StoreResult<Vec<Location>>;
    /// Create the root with `label` unless it already exists.
    async fn ensure_root(&self, id: LocationId, label: &str) -> StoreResult<Location>;
    /// Non-discarded stock per location.
    async fn active_stock_counts(&self) -> StoreResult<HashMap<LocationId, u64>>;
    /// Plan and apply a whole-tree save atomically.
    async fn save_tree(&self, posted: &[TreeNodeInput], root: LocationId) -> StoreResult<TreeSavePlan>;

    // Stock

    /// Insert all units or none.
    async fn insert_stock(&self, units: &[Stock]) -> StoreResult<()>;
    async fn get_stock(&self, id: StockId) -> StoreResult<Option<Stock>>;
    async fn stock_views(&self, pm: PmFilter) -> StoreResult<Vec<StockView>>;
    /// Oldest available units of a product at a location.
    async fn fifo_candidates(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        limit: usize,
    ) -> StoreResult<Vec<StockId>>;
    async fn transfer_stock(
        &self,
        id: StockId,
        from: LocationId,
        to: LocationId,
        now: DateTime<Utc>,
    ) -> StoreResult<Transfer>;
    async fn discard_stock(
        &self,
        id: StockId,
        expect: ProductKind,
        request: &DiscardRequest,
    ) -> StoreResult<Discarded>;
    async fn set_iams_id(&self, id: StockId, iams_id: Option<String>) -> StoreResult<Stock>;
    async fn stock_history(&self, id: StockId) -> StoreResult<StockHistory>;

    // Rentals

    async fn lend_stock(&self, id: StockId, expect: ProductKind, loan: NewLoan) -> StoreResult<Rental>;
    async fn get_rental(&self, id: RentalId) -> StoreResult<Option<Rental>>;
    async fn extend_rental(
        &self,
        id: RentalId,
        device: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Rental>;
    /// `requester == None` is an administrative return.
    async fn return_rental(
        &self,
        id: RentalId,
        requester: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<Rental>;
    async fn open_rentals(&self, loan_type: LoanType) -> StoreResult<Vec<RentalView>>;

    // Devices

    async fn get_device(&self, id: DeviceId) -> StoreResult<Option<Device>>;
    async fn upsert_device(&self, id: DeviceId, name: &str, now: DateTime<Utc>) -> StoreResult<Device>;
    async fn list_devices(&self) -> StoreResult<Vec<Device>>;

    // Accounts

    /// Match by username, or by email case-insensitively.
    async fn find_user(&self, login: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn identity_taken(&self, username: &str, email: &str) -> StoreResult<IdentityTaken>;
    /// `Conflict` when the username or email is taken.
    async fn insert_user(&self, user: User) -> StoreResult<User>;
    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> StoreResult<()>;

    /// Drop unconsumed codes for the same email and purpose, then store `code`.
    async fn replace_code(&self, code: VerificationCode) -> StoreResult<()>;
    async fn latest_live_code(
        &self,
        email: &str,
        purpose: VerificationPurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationCode>>;
    /// Consume a code; a failed attempt also bumps its attempt counter.
    async fn consume_code(&self, id: CodeId, at: DateTime<Utc>, failed_attempt: bool) -> StoreResult<()>;
}
