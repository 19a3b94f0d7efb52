//! In-memory `LabStore`.
//!
//! One `RwLock` guards the whole state; every mutation holds the write lock
//! for its full read-check-write sequence, which gives the same per-unit
//! atomicity as a database transaction.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use labinv_auth::{User, VerificationCode, VerificationPurpose};
use labinv_core::{CodeId, DeviceId, LocationId, ProductId, RentalId, StockId, UserId};
use labinv_inventory::{
    Device, DiscardRequest, Discarded, LifecycleError, LoanType, NewLoan, ProductKind, Rental, RentalView,
    Stock, StockHistory, StockStatus, StockView, Transfer,
};
use labinv_locations::{Location, TreeNodeInput, TreeSavePlan, plan_tree_save};
use labinv_products::{PmFilter, Product, ProductDraft, ProductUsage};

use super::r#trait::{IdentityTaken, LabStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    locations: HashMap<LocationId, Location>,
    stock: HashMap<StockId, Stock>,
    rentals: HashMap<RentalId, Rental>,
    transfers: Vec<Transfer>,
    discards: Vec<Discarded>,
    devices: HashMap<DeviceId, Device>,
    users: HashMap<UserId, User>,
    codes: Vec<VerificationCode>,
}

impl State {
    fn product_of(&self, stock: &Stock) -> StoreResult<&Product> {
        self.products
            .get(&stock.product_id)
            .ok_or_else(|| StoreError::NotFound(format!("product {}", stock.product_id)))
    }

    fn brand_model_taken(&self, brand: &str, model: &str, except: Option<ProductId>) -> bool {
        self.products
            .values()
            .any(|p| Some(p.id) != except && p.collides_with(brand, model))
    }

    fn has_open_rental(&self, stock_id: StockId) -> bool {
        self.rentals.values().any(|r| r.stock_id == stock_id && r.is_open())
    }

    fn is_leaf(&self, id: &LocationId) -> bool {
        self.locations.contains_key(id) && !self.locations.values().any(|l| l.parent_id == Some(*id))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Unexpected(anyhow::anyhow!("lock poisoned")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Unexpected(anyhow::anyhow!("lock poisoned")))
    }
}

#[async_trait]
impl LabStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.read().map(|_| ())
    }

    async fn list_products(&self) -> StoreResult<Vec<Product>> {
        Ok(self.read()?.products.values().cloned().collect())
    }

    async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    async fn insert_product(&self, product: Product) -> StoreResult<Product> {
        let mut state = self.write()?;
        if state.brand_model_taken(&product.brand, &product.model, None) {
            return Err(StoreError::Conflict("brand and model already exist".into()));
        }
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(&self, id: ProductId, draft: ProductDraft) -> StoreResult<Product> {
        let mut state = self.write()?;
        let has_stock = state.stock.values().any(|s| s.product_id == id);
        let mut product = state
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        product.update(draft, has_stock)?;
        if state.brand_model_taken(&product.brand, &product.model, Some(id)) {
            return Err(StoreError::Conflict("brand and model already exist".into()));
        }
        state.products.insert(id, product.clone());
        Ok(product)
    }

    async fn delete_product(&self, id: ProductId) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.products.contains_key(&id) {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        if state.stock.values().any(|s| s.product_id == id) {
            return Err(StoreError::Conflict("product still has stock".into()));
        }
        state.products.remove(&id);
        Ok(())
    }

    async fn product_usage(&self, ids: &[ProductId]) -> StoreResult<Vec<ProductUsage>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .map(|id| {
                let units = state.stock.values().filter(|s| s.product_id == *id);
                let (mut total, mut short_term) = (0u64, 0u64);
                for unit in units {
                    total += 1;
                    if unit.status() == StockStatus::ShortTerm {
                        short_term += 1;
                    }
                }
                ProductUsage::new(*id, total, short_term)
            })
            .collect())
    }

    async fn list_locations(&self) -> StoreResult<Vec<Location>> {
        Ok(self.read()?.locations.values().cloned().collect())
    }

    async fn ensure_root(&self, id: LocationId, label: &str) -> StoreResult<Location> {
        let mut state = self.write()?;
        if let Some(existing) = state.locations.get(&id) {
            return Ok(existing.clone());
        }
        if state.locations.values().any(|l| l.label == label) {
            return Err(StoreError::Conflict(format!("label {label:?} is taken")));
        }
        let root = Location::new(id, label, None);
        state.locations.insert(id, root.clone());
        Ok(root)
    }

    async fn active_stock_counts(&self) -> StoreResult<HashMap<LocationId, u64>> {
        let state = self.read()?;
        let mut counts = HashMap::new();
        for unit in state.stock.values().filter(|s| !s.is_discarded()) {
            *counts.entry(unit.location_id).or_default() += 1;
        }
        Ok(counts)
    }

    async fn save_tree(&self, posted: &[TreeNodeInput], root: LocationId) -> StoreResult<TreeSavePlan> {
        let mut state = self.write()?;
        let existing: Vec<Location> = state.locations.values().cloned().collect();
        let active: HashSet<LocationId> = state
            .stock
            .values()
            .filter(|s| !s.is_discarded())
            .map(|s| s.location_id)
            .collect();
        let occupied: HashSet<LocationId> = state.stock.values().map(|s| s.location_id).collect();

        let plan = plan_tree_save(posted, &existing, &active, &occupied, root)?;
        for loc in plan.creates.iter().chain(plan.updates.iter()) {
            state.locations.insert(loc.id, loc.clone());
        }
        for id in &plan.deletes {
            state.locations.remove(id);
        }
        Ok(plan)
    }

    async fn insert_stock(&self, units: &[Stock]) -> StoreResult<()> {
        let mut state = self.write()?;
        for unit in units {
            if !state.products.contains_key(&unit.product_id) {
                return Err(StoreError::NotFound(format!("product {}", unit.product_id)));
            }
            if !state.locations.contains_key(&unit.location_id) {
                return Err(StoreError::NotFound(format!("location {}", unit.location_id)));
            }
        }
        for unit in units {
            state.stock.insert(unit.id, unit.clone());
        }
        Ok(())
    }

    async fn get_stock(&self, id: StockId) -> StoreResult<Option<Stock>> {
        Ok(self.read()?.stock.get(&id).cloned())
    }

    async fn stock_views(&self, pm: PmFilter) -> StoreResult<Vec<StockView>> {
        let state = self.read()?;
        Ok(state
            .stock
            .values()
            .filter_map(|s| {
                let product = state.products.get(&s.product_id)?;
                pm.admits(product.is_property_managed).then(|| StockView {
                    stock: s.clone(),
                    product: product.clone(),
                })
            })
            .collect())
    }

    async fn fifo_candidates(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        limit: usize,
    ) -> StoreResult<Vec<StockId>> {
        let state = self.read()?;
        let mut units: Vec<&Stock> = state
            .stock
            .values()
            .filter(|s| s.product_id == product_id && s.location_id == location_id && s.is_available())
            .collect();
        units.sort_by_key(|s| (s.created_at, s.id));
        Ok(units.into_iter().take(limit).map(|s| s.id).collect())
    }

    async fn transfer_stock(
        &self,
        id: StockId,
        from: LocationId,
        to: LocationId,
        now: DateTime<Utc>,
    ) -> StoreResult<Transfer> {
        let mut state = self.write()?;
        if !state.is_leaf(&to) {
            return Err(LifecycleError::DestinationNotLeaf.into());
        }
        let unit = state.stock.get_mut(&id).ok_or(LifecycleError::StockNotFound)?;
        let transfer = unit.transfer(from, to, now)?;
        state.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn discard_stock(
        &self,
        id: StockId,
        expect: ProductKind,
        request: &DiscardRequest,
    ) -> StoreResult<Discarded> {
        let mut state = self.write()?;
        let unit = state.stock.get(&id).ok_or(LifecycleError::StockNotFound)?;
        let is_pm = state.product_of(unit)?.is_property_managed;
        let unit = state.stock.get_mut(&id).ok_or(LifecycleError::StockNotFound)?;
        let record = unit.discard(is_pm, expect, request)?;
        state.discards.push(record.clone());
        Ok(record)
    }

    async fn set_iams_id(&self, id: StockId, iams_id: Option<String>) -> StoreResult<Stock> {
        let mut state = self.write()?;
        let unit = state.stock.get(&id).ok_or(LifecycleError::StockNotFound)?;
        ProductKind::PropertyManaged.ensure(state.product_of(unit)?.is_property_managed)?;
        let unit = state.stock.get_mut(&id).ok_or(LifecycleError::StockNotFound)?;
        unit.iams_id = iams_id;
        Ok(unit.clone())
    }

    async fn stock_history(&self, id: StockId) -> StoreResult<StockHistory> {
        let state = self.read()?;
        if !state.stock.contains_key(&id) {
            return Err(LifecycleError::StockNotFound.into());
        }
        let mut history = StockHistory {
            transfers: state.transfers.iter().filter(|t| t.stock_id == id).cloned().collect(),
            rentals: state.rentals.values().filter(|r| r.stock_id == id).cloned().collect(),
            discards: state.discards.iter().filter(|d| d.stock_id == id).cloned().collect(),
        };
        history.sort();
        Ok(history)
    }

    async fn lend_stock(&self, id: StockId, expect: ProductKind, loan: NewLoan) -> StoreResult<Rental> {
        let mut state = self.write()?;
        let unit = state.stock.get(&id).ok_or(LifecycleError::StockNotFound)?;
        let is_pm = state.product_of(unit)?.is_property_managed;
        let open = state.has_open_rental(id);
        let unit = state.stock.get_mut(&id).ok_or(LifecycleError::StockNotFound)?;
        let rental = unit.lend(is_pm, expect, open, loan)?;
        state.rentals.insert(rental.id, rental.clone());
        Ok(rental)
    }

    async fn get_rental(&self, id: RentalId) -> StoreResult<Option<Rental>> {
        Ok(self.read()?.rentals.get(&id).cloned())
    }

    async fn extend_rental(
        &self,
        id: RentalId,
        device: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Rental> {
        let mut state = self.write()?;
        let rental = state.rentals.get_mut(&id).ok_or(LifecycleError::RentalNotFound)?;
        rental.extend(device, hours, now)?;
        Ok(rental.clone())
    }

    async fn return_rental(
        &self,
        id: RentalId,
        requester: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<Rental> {
        let mut guard = self.write()?;
        let State { stock, rentals, .. } = &mut *guard;
        let rental = rentals.get_mut(&id).ok_or(LifecycleError::RentalNotFound)?;
        let unit = stock.get_mut(&rental.stock_id).ok_or(LifecycleError::StockNotFound)?;
        unit.receive_return(rental, requester, at)?;
        Ok(rental.clone())
    }

    async fn open_rentals(&self, loan_type: LoanType) -> StoreResult<Vec<RentalView>> {
        let state = self.read()?;
        Ok(state
            .rentals
            .values()
            .filter(|r| r.is_open() && r.loan_type == loan_type)
            .filter_map(|r| {
                let product = state.products.get(&r.product_id)?;
                Some(RentalView {
                    rental: r.clone(),
                    product: product.clone(),
                    iams_id: state.stock.get(&r.stock_id).and_then(|s| s.iams_id.clone()),
                })
            })
            .collect())
    }

    async fn get_device(&self, id: DeviceId) -> StoreResult<Option<Device>> {
        Ok(self.read()?.devices.get(&id).cloned())
    }

    async fn upsert_device(&self, id: DeviceId, name: &str, now: DateTime<Utc>) -> StoreResult<Device> {
        let mut state = self.write()?;
        let device = match state.devices.get_mut(&id) {
            Some(device) => {
                device.rename(name, now)?;
                device.clone()
            }
            None => {
                let device = Device::register(id, name, now)?;
                state.devices.insert(id, device.clone());
                device
            }
        };
        Ok(device)
    }

    async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        Ok(self.read()?.devices.values().cloned().collect())
    }

    async fn find_user(&self, login: &str) -> StoreResult<Option<User>> {
        let login = login.trim();
        let email = login.to_lowercase();
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.username == login || u.email == email)
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.trim().to_lowercase();
        Ok(self.read()?.users.values().find(|u| u.email == email).cloned())
    }

    async fn identity_taken(&self, username: &str, email: &str) -> StoreResult<IdentityTaken> {
        let state = self.read()?;
        Ok(IdentityTaken {
            username: state.users.values().any(|u| u.username == username),
            email: state.users.values().any(|u| u.email == email),
        })
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let mut state = self.write()?;
        if state
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(StoreError::Conflict("username or email already registered".into()));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> StoreResult<()> {
        let mut state = self.write()?;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn replace_code(&self, code: VerificationCode) -> StoreResult<()> {
        let mut state = self.write()?;
        state
            .codes
            .retain(|c| !(c.email == code.email && c.purpose == code.purpose && c.consumed_at.is_none()));
        state.codes.push(code);
        Ok(())
    }

    async fn latest_live_code(
        &self,
        email: &str,
        purpose: VerificationPurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationCode>> {
        Ok(self
            .read()?
            .codes
            .iter()
            .filter(|c| c.email == email && c.purpose == purpose && c.is_live(now))
            .max_by_key(|c| (c.created_at, c.id))
            .cloned())
    }

    async fn consume_code(&self, id: CodeId, at: DateTime<Utc>, failed_attempt: bool) -> StoreResult<()> {
        let mut state = self.write()?;
        let code = state
            .codes
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("code {id}")))?;
        code.consumed_at = Some(at);
        if failed_attempt {
            code.attempts += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use labinv_products::ProductDraft;

    fn draft(name: &str, pm: bool) -> ProductDraft {
        ProductDraft {
            name: name.into(),
            brand: "Acme".into(),
            model: name.to_uppercase(),
            is_property_managed: pm,
            ..ProductDraft::default()
        }
    }

    async fn seeded() -> (InMemoryStore, LocationId, LocationId, Product) {
        let store = InMemoryStore::new();
        let root = LocationId::new();
        store.ensure_root(root, "Container Area").await.unwrap();
        let shelf = LocationId::new();
        store
            .save_tree(
                &[
                    TreeNodeInput {
                        id: root.to_string(),
                        label: "Container Area".into(),
                        children: vec![],
                    },
                    TreeNodeInput {
                        id: shelf.to_string(),
                        label: "Shelf".into(),
                        children: vec![],
                    },
                ],
                root,
            )
            .await
            .unwrap();
        let product = Product::create(ProductId::new(), draft("scope", true), Utc::now()).unwrap();
        let product = store.insert_product(product).await.unwrap();
        (store, root, shelf, product)
    }

    #[tokio::test]
    async fn duplicate_brand_model_conflicts() {
        let (store, _, _, product) = seeded().await;
        let twin = Product::create(ProductId::new(), draft("scope", false), Utc::now()).unwrap();
        assert_eq!(twin.model, product.model);
        assert!(matches!(store.insert_product(twin).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn transfer_writes_audit_and_rejects_non_leaf() {
        let (store, root, shelf, product) = seeded().await;
        let unit = Stock::received(StockId::new(), product.id, root, Utc::now());
        store.insert_stock(std::slice::from_ref(&unit)).await.unwrap();

        let missing = LocationId::new();
        let err = store.transfer_stock(unit.id, root, missing, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Lifecycle(LifecycleError::DestinationNotLeaf)));

        store.transfer_stock(unit.id, root, shelf, Utc::now()).await.unwrap();
        let history = store.stock_history(unit.id).await.unwrap();
        assert_eq!(history.transfers.len(), 1);
        assert_eq!(store.get_stock(unit.id).await.unwrap().unwrap().location_id, shelf);
    }

    #[tokio::test]
    async fn lend_then_return_restores_in_stock() {
        let (store, root, _, product) = seeded().await;
        let unit = Stock::received(StockId::new(), product.id, root, Utc::now());
        store.insert_stock(std::slice::from_ref(&unit)).await.unwrap();
        let loan = NewLoan {
            loan_type: LoanType::ShortTerm,
            borrower: "device-1".into(),
            renter: Some("LabAdmin".into()),
            loan_date: Utc::now(),
            due_date: Some(Utc::now() + Duration::hours(3)),
        };
        let rental = store
            .lend_stock(unit.id, ProductKind::PropertyManaged, loan.clone())
            .await
            .unwrap();
        let again = store.lend_stock(unit.id, ProductKind::PropertyManaged, loan).await;
        assert!(matches!(again, Err(StoreError::Lifecycle(LifecycleError::NotInStock(_)))));

        let err = store.return_rental(rental.id, Some("device-2"), Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Lifecycle(LifecycleError::NotBorrower)));
        store.return_rental(rental.id, Some("device-1"), Utc::now()).await.unwrap();
        let unit = store.get_stock(unit.id).await.unwrap().unwrap();
        assert_eq!(unit.status(), StockStatus::InStock);
    }

    #[tokio::test]
    async fn product_with_stock_cannot_be_deleted() {
        let (store, root, _, product) = seeded().await;
        let unit = Stock::received(StockId::new(), product.id, root, Utc::now());
        store.insert_stock(&[unit]).await.unwrap();
        assert!(matches!(store.delete_product(product.id).await, Err(StoreError::Conflict(_))));
        let usage = store.product_usage(&[product.id]).await.unwrap();
        assert_eq!(usage[0].stock_count, 1);
        assert!(!usage[0].can_delete);
    }

    #[tokio::test]
    async fn fifo_candidates_are_oldest_first() {
        let (store, root, _, product) = seeded().await;
        let t0 = Utc::now();
        let units: Vec<Stock> = (0..3)
            .map(|i| Stock::received(StockId::new(), product.id, root, t0 + Duration::seconds(i)))
            .collect();
        store.insert_stock(&units).await.unwrap();
        let picked = store.fifo_candidates(product.id, root, 2).await.unwrap();
        assert_eq!(picked, vec![units[0].id, units[1].id]);
    }

    #[tokio::test]
    async fn replacing_a_code_drops_the_previous_one() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let first = VerificationCode::issue("a@b.io", VerificationPurpose::Signup, "h1".into(), None, None, now);
        let second = VerificationCode::issue("a@b.io", VerificationPurpose::Signup, "h2".into(), None, None, now);
        store.replace_code(first).await.unwrap();
        store.replace_code(second.clone()).await.unwrap();
        let live = store
            .latest_live_code("a@b.io", VerificationPurpose::Signup, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.id, second.id);

        store.consume_code(live.id, now, true).await.unwrap();
        assert!(
            store
                .latest_live_code("a@b.io", VerificationPurpose::Signup, now)
                .await
                .unwrap()
                .is_none()
        );
    }
}
