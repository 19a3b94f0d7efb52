//! Postgres-backed `LabStore`.
//!
//! Every lifecycle mutation runs in one transaction that locks the stock row
//! (`SELECT ... FOR UPDATE`), re-applies the domain guard and writes the new
//! state together with its audit or ledger row. Lock order is always stock
//! row first, then rental row.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Conflict` |
//! | Database (other) | Any other | `Unexpected` |
//! | RowNotFound | N/A | `NotFound` |
//! | Other | N/A | `Unexpected` |

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use labinv_auth::{User, VerificationCode, VerificationPurpose};
use labinv_core::{CodeId, DeviceId, DiscardId, LocationId, ProductId, RentalId, StockId, TransferId, UserId};
use labinv_inventory::{
    Device, DiscardRequest, Discarded, LifecycleError, LoanType, NewLoan, ProductKind, Rental, RentalView,
    Stock, StockHistory, StockView, Transfer,
};
use labinv_locations::{Location, TreeNodeInput, TreeSavePlan, plan_tree_save};
use labinv_products::{PmFilter, Product, ProductDraft, ProductUsage};

use super::r#trait::{IdentityTaken, LabStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Connect and apply the embedded migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .context("failed to connect to postgres")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// Row decoding. Joined queries prefix product columns with `p_`.

fn decode_err<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

fn product_from(row: &PgRow, prefix: &str) -> Result<Product, sqlx::Error> {
    let col = |name: &str| format!("{prefix}{name}");
    Ok(Product {
        id: ProductId::from_uuid(row.try_get(col("id").as_str())?),
        name: row.try_get(col("name").as_str())?,
        brand: row.try_get(col("brand").as_str())?,
        model: row.try_get(col("model").as_str())?,
        specifications: row.try_get(col("specifications").as_str())?,
        price: row.try_get(col("price").as_str())?,
        image_link: row.try_get(col("image_link").as_str())?,
        local_image: row.try_get(col("local_image").as_str())?,
        is_property_managed: row.try_get(col("is_property_managed").as_str())?,
        created_at: row.try_get(col("created_at").as_str())?,
    })
}

fn stock_from(row: &PgRow) -> Result<Stock, sqlx::Error> {
    let status: String = row.try_get("current_status")?;
    Ok(Stock::restore(
        StockId::from_uuid(row.try_get("id")?),
        ProductId::from_uuid(row.try_get("product_id")?),
        LocationId::from_uuid(row.try_get("location_id")?),
        status.parse().map_err(decode_err)?,
        row.try_get("iams_id")?,
        row.try_get("created_at")?,
    ))
}

fn location_from(row: &PgRow) -> Result<Location, sqlx::Error> {
    let parent: Option<Uuid> = row.try_get("parent_id")?;
    Ok(Location::new(
        LocationId::from_uuid(row.try_get("id")?),
        row.try_get::<String, _>("label")?,
        parent.map(LocationId::from_uuid),
    ))
}

fn rental_from(row: &PgRow) -> Result<Rental, sqlx::Error> {
    let loan_type: String = row.try_get("loan_type")?;
    Ok(Rental {
        id: RentalId::from_uuid(row.try_get("id")?),
        stock_id: StockId::from_uuid(row.try_get("stock_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        location_id: LocationId::from_uuid(row.try_get("location_id")?),
        borrower: row.try_get("borrower")?,
        renter: row.try_get("renter")?,
        loan_type: loan_type.parse().map_err(decode_err)?,
        loan_date: row.try_get("loan_date")?,
        due_date: row.try_get("due_date")?,
        return_date: row.try_get("return_date")?,
    })
}

fn transfer_from(row: &PgRow) -> Result<Transfer, sqlx::Error> {
    Ok(Transfer {
        id: TransferId::from_uuid(row.try_get("id")?),
        stock_id: StockId::from_uuid(row.try_get("stock_id")?),
        from_location: LocationId::from_uuid(row.try_get("from_location")?),
        to_location: LocationId::from_uuid(row.try_get("to_location")?),
        created_at: row.try_get("created_at")?,
    })
}

fn discard_from(row: &PgRow) -> Result<Discarded, sqlx::Error> {
    Ok(Discarded {
        id: DiscardId::from_uuid(row.try_get("id")?),
        stock_id: StockId::from_uuid(row.try_get("stock_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        location_id: LocationId::from_uuid(row.try_get("location_id")?),
        reason: row.try_get("reason")?,
        operator: row.try_get("operator")?,
        discard_date: row.try_get("discard_date")?,
    })
}

fn device_from(row: &PgRow) -> Result<Device, sqlx::Error> {
    Ok(Device {
        id: DeviceId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_from(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn code_from(row: &PgRow) -> Result<VerificationCode, sqlx::Error> {
    let purpose: String = row.try_get("purpose")?;
    let user_id: Option<Uuid> = row.try_get("user_id")?;
    let attempts: i32 = row.try_get("attempts")?;
    Ok(VerificationCode {
        id: CodeId::from_uuid(row.try_get("id")?),
        email: row.try_get("email")?,
        user_id: user_id.map(UserId::from_uuid),
        purpose: purpose.parse().map_err(decode_err)?,
        code_hash: row.try_get("code_hash")?,
        username: row.try_get("username")?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        expires_at: row.try_get("expires_at")?,
        consumed_at: row.try_get("consumed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_all<T>(
    operation: &str,
    rows: &[PgRow],
    f: impl Fn(&PgRow) -> Result<T, sqlx::Error>,
) -> StoreResult<Vec<T>> {
    rows.iter().map(|r| f(r).map_err(|e| map_sqlx_error(operation, e))).collect()
}

fn pm_flag(pm: PmFilter) -> Option<bool> {
    match pm {
        PmFilter::All => None,
        PmFilter::Pm => Some(true),
        PmFilter::NonPm => Some(false),
    }
}

/// Lock one stock row and report whether its product is property-managed.
async fn lock_stock(conn: &mut PgConnection, id: StockId, operation: &str) -> StoreResult<(Stock, bool)> {
    let row = sqlx::query(
        r#"
        SELECT s.id, s.product_id, s.location_id, s.current_status, s.iams_id, s.created_at,
               p.is_property_managed
        FROM stock s
        JOIN products p ON p.id = s.product_id
        WHERE s.id = $1
        FOR UPDATE OF s
        "#,
    )
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?
    .ok_or(LifecycleError::StockNotFound)?;

    let unit = stock_from(&row).map_err(|e| map_sqlx_error(operation, e))?;
    let is_pm: bool = row
        .try_get("is_property_managed")
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok((unit, is_pm))
}

/// Write back the mutable columns of a unit. `discarded` always follows the status.
async fn persist_stock(conn: &mut PgConnection, unit: &Stock, operation: &str) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE stock
        SET location_id = $2, current_status = $3, discarded = $4, iams_id = $5
        WHERE id = $1
        "#,
    )
    .bind(unit.id.as_uuid())
    .bind(unit.location_id.as_uuid())
    .bind(unit.status().as_str())
    .bind(unit.is_discarded())
    .bind(unit.iams_id.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(())
}

async fn lock_rental(conn: &mut PgConnection, id: RentalId, operation: &str) -> StoreResult<Rental> {
    let row = sqlx::query(
        r#"
        SELECT id, stock_id, product_id, location_id, borrower, renter, loan_type,
               loan_date, due_date, return_date
        FROM rentals
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?
    .ok_or(LifecycleError::RentalNotFound)?;
    rental_from(&row).map_err(|e| map_sqlx_error(operation, e))
}

#[async_trait]
impl LabStore for PostgresStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_products(&self) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, brand, model, specifications, price, image_link, local_image,
                   is_property_managed, created_at
            FROM products
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;
        decode_all("list_products", &rows, |r| product_from(r, ""))
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, brand, model, specifications, price, image_link, local_image,
                   is_property_managed, created_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;
        row.map(|r| product_from(&r, ""))
            .transpose()
            .map_err(|e| map_sqlx_error("get_product", e))
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn insert_product(&self, product: Product) -> StoreResult<Product> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, brand, model, specifications, price, image_link, local_image,
                is_property_managed, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.brand)
        .bind(&product.model)
        .bind(&product.specifications)
        .bind(product.price)
        .bind(product.image_link.as_deref())
        .bind(product.local_image.as_deref())
        .bind(product.is_property_managed)
        .bind(product.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("brand and model already exist".into())
            } else {
                map_sqlx_error("insert_product", e)
            }
        })?;
        Ok(product)
    }

    #[instrument(skip(self, draft), fields(product_id = %id), err)]
    async fn update_product(&self, id: ProductId, draft: ProductDraft) -> StoreResult<Product> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update_product.begin", e))?;

        let row = sqlx::query(
            r#"
            SELECT id, name, brand, model, specifications, price, image_link, local_image,
                   is_property_managed, created_at
            FROM products
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_product.load", e))?
        .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        let mut product = product_from(&row, "").map_err(|e| map_sqlx_error("update_product.decode", e))?;

        let has_stock: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM stock WHERE product_id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_product.has_stock", e))?;
        product.update(draft, has_stock)?;

        sqlx::query(
            r#"
            UPDATE products
            SET name = $2, brand = $3, model = $4, specifications = $5, price = $6,
                image_link = $7, local_image = $8, is_property_managed = $9
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(&product.name)
        .bind(&product.brand)
        .bind(&product.model)
        .bind(&product.specifications)
        .bind(product.price)
        .bind(product.image_link.as_deref())
        .bind(product.local_image.as_deref())
        .bind(product.is_property_managed)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("brand and model already exist".into())
            } else {
                map_sqlx_error("update_product.write", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_product.commit", e))?;
        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete_product(&self, id: ProductId) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("delete_product.begin", e))?;

        let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM products WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_product.load", e))?;
        if found.is_none() {
            return Err(StoreError::NotFound(format!("product {id}")));
        }

        let has_stock: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM stock WHERE product_id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_product.has_stock", e))?;
        if has_stock {
            return Err(StoreError::Conflict("product still has stock".into()));
        }

        sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_product.delete", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_product.commit", e))?;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn product_usage(&self, ids: &[ProductId]) -> StoreResult<Vec<ProductUsage>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT product_id,
                   COUNT(*) AS stock_count,
                   COUNT(*) FILTER (WHERE current_status = 'short_term') AS short_term_count
            FROM stock
            WHERE product_id = ANY($1)
            GROUP BY product_id
            "#,
        )
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product_usage", e))?;

        let mut counts: HashMap<Uuid, (u64, u64)> = HashMap::new();
        for row in &rows {
            let decode = || -> Result<(Uuid, i64, i64), sqlx::Error> {
                Ok((
                    row.try_get("product_id")?,
                    row.try_get("stock_count")?,
                    row.try_get("short_term_count")?,
                ))
            };
            let (id, total, short_term) = decode().map_err(|e| map_sqlx_error("product_usage", e))?;
            counts.insert(id, (total.max(0) as u64, short_term.max(0) as u64));
        }
        Ok(ids
            .iter()
            .map(|id| {
                let (total, short_term) = counts.get(id.as_uuid()).copied().unwrap_or((0, 0));
                ProductUsage::new(*id, total, short_term)
            })
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn list_locations(&self) -> StoreResult<Vec<Location>> {
        let rows = sqlx::query("SELECT id, label, parent_id FROM locations")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_locations", e))?;
        decode_all("list_locations", &rows, location_from)
    }

    #[instrument(skip(self), fields(root = %id), err)]
    async fn ensure_root(&self, id: LocationId, label: &str) -> StoreResult<Location> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO locations (id, label, parent_id)
            VALUES ($1, $2, NULL)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id.as_uuid())
        .bind(label)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_root.insert", e))?;
        if inserted.rows_affected() > 0 {
            tracing::info!(root = %id, label, "created root location");
        }

        let row = sqlx::query("SELECT id, label, parent_id FROM locations WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_root.load", e))?;
        location_from(&row).map_err(|e| map_sqlx_error("ensure_root.decode", e))
    }

    #[instrument(skip(self), err)]
    async fn active_stock_counts(&self) -> StoreResult<HashMap<LocationId, u64>> {
        let rows = sqlx::query(
            r#"
            SELECT location_id, COUNT(*) AS n
            FROM stock
            WHERE NOT discarded
            GROUP BY location_id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_stock_counts", e))?;

        let pairs = decode_all("active_stock_counts", &rows, |r| {
            let id: Uuid = r.try_get("location_id")?;
            let n: i64 = r.try_get("n")?;
            Ok((LocationId::from_uuid(id), n.max(0) as u64))
        })?;
        Ok(pairs.into_iter().collect())
    }

    #[instrument(skip(self, posted), fields(root = %root, nodes = posted.len()), err)]
    async fn save_tree(&self, posted: &[TreeNodeInput], root: LocationId) -> StoreResult<TreeSavePlan> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("save_tree.begin", e))?;

        // Blocks transfers (which take FOR SHARE on their destination) until commit.
        sqlx::query("LOCK TABLE locations IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("save_tree.lock", e))?;

        let rows = sqlx::query("SELECT id, label, parent_id FROM locations")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("save_tree.load", e))?;
        let existing = decode_all("save_tree.load", &rows, location_from)?;

        let rows = sqlx::query(
            r#"
            SELECT location_id, bool_or(NOT discarded) AS active
            FROM stock
            GROUP BY location_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("save_tree.stock", e))?;
        let occupancy = decode_all("save_tree.stock", &rows, |r| {
            let id: Uuid = r.try_get("location_id")?;
            let active: bool = r.try_get("active")?;
            Ok((LocationId::from_uuid(id), active))
        })?;
        let occupied: HashSet<LocationId> = occupancy.iter().map(|(id, _)| *id).collect();
        let active: HashSet<LocationId> = occupancy.iter().filter(|(_, a)| *a).map(|(id, _)| *id).collect();

        let plan = plan_tree_save(posted, &existing, &active, &occupied, root)?;

        for loc in &plan.creates {
            sqlx::query("INSERT INTO locations (id, label, parent_id) VALUES ($1, $2, $3)")
                .bind(loc.id.as_uuid())
                .bind(&loc.label)
                .bind(loc.parent_id.map(Uuid::from))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("save_tree.create", e))?;
        }
        for loc in &plan.updates {
            sqlx::query("UPDATE locations SET label = $2, parent_id = $3 WHERE id = $1")
                .bind(loc.id.as_uuid())
                .bind(&loc.label)
                .bind(loc.parent_id.map(Uuid::from))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("save_tree.update", e))?;
        }
        for id in &plan.deletes {
            sqlx::query("DELETE FROM locations WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("save_tree.delete", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("save_tree.commit", e))?;

        tracing::info!(
            created = plan.creates.len(),
            updated = plan.updates.len(),
            deleted = plan.deletes.len(),
            "location tree saved"
        );
        Ok(plan)
    }

    #[instrument(skip(self, units), fields(count = units.len()), err)]
    async fn insert_stock(&self, units: &[Stock]) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_stock.begin", e))?;
        for unit in units {
            sqlx::query(
                r#"
                INSERT INTO stock (id, product_id, location_id, current_status, discarded, iams_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(unit.id.as_uuid())
            .bind(unit.product_id.as_uuid())
            .bind(unit.location_id.as_uuid())
            .bind(unit.status().as_str())
            .bind(unit.is_discarded())
            .bind(unit.iams_id.as_deref())
            .bind(unit.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_stock", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_stock.commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(stock_id = %id), err)]
    async fn get_stock(&self, id: StockId) -> StoreResult<Option<Stock>> {
        let row = sqlx::query(
            r#"
            SELECT id, product_id, location_id, current_status, iams_id, created_at
            FROM stock
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_stock", e))?;
        row.map(|r| stock_from(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("get_stock", e))
    }

    #[instrument(skip(self), err)]
    async fn stock_views(&self, pm: PmFilter) -> StoreResult<Vec<StockView>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.product_id, s.location_id, s.current_status, s.iams_id, s.created_at,
                   p.id AS p_id, p.name AS p_name, p.brand AS p_brand, p.model AS p_model,
                   p.specifications AS p_specifications, p.price AS p_price,
                   p.image_link AS p_image_link, p.local_image AS p_local_image,
                   p.is_property_managed AS p_is_property_managed, p.created_at AS p_created_at
            FROM stock s
            JOIN products p ON p.id = s.product_id
            WHERE $1::boolean IS NULL OR p.is_property_managed = $1
            "#,
        )
        .bind(pm_flag(pm))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_views", e))?;
        decode_all("stock_views", &rows, |r| {
            Ok(StockView {
                stock: stock_from(r)?,
                product: product_from(r, "p_")?,
            })
        })
    }

    #[instrument(skip(self), fields(product_id = %product_id, location_id = %location_id), err)]
    async fn fifo_candidates(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        limit: usize,
    ) -> StoreResult<Vec<StockId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM stock
            WHERE product_id = $1 AND location_id = $2 AND current_status = 'in_stock'
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(location_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fifo_candidates", e))?;
        Ok(ids.into_iter().map(StockId::from_uuid).collect())
    }

    #[instrument(skip(self), fields(stock_id = %id), err)]
    async fn transfer_stock(
        &self,
        id: StockId,
        from: LocationId,
        to: LocationId,
        now: DateTime<Utc>,
    ) -> StoreResult<Transfer> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("transfer_stock.begin", e))?;

        let destination: Option<Uuid> = sqlx::query_scalar("SELECT id FROM locations WHERE id = $1 FOR SHARE")
            .bind(to.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("transfer_stock.destination", e))?;
        let has_children: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM locations WHERE parent_id = $1)")
            .bind(to.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("transfer_stock.children", e))?;
        if destination.is_none() || has_children {
            return Err(LifecycleError::DestinationNotLeaf.into());
        }

        let (mut unit, _) = lock_stock(&mut tx, id, "transfer_stock.lock").await?;
        let transfer = unit.transfer(from, to, now)?;
        persist_stock(&mut tx, &unit, "transfer_stock.write").await?;

        sqlx::query(
            r#"
            INSERT INTO transfers (id, stock_id, from_location, to_location, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(transfer.id.as_uuid())
        .bind(transfer.stock_id.as_uuid())
        .bind(transfer.from_location.as_uuid())
        .bind(transfer.to_location.as_uuid())
        .bind(transfer.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("transfer_stock.audit", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("transfer_stock.commit", e))?;
        Ok(transfer)
    }

    #[instrument(skip(self, request), fields(stock_id = %id), err)]
    async fn discard_stock(
        &self,
        id: StockId,
        expect: ProductKind,
        request: &DiscardRequest,
    ) -> StoreResult<Discarded> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("discard_stock.begin", e))?;

        let (mut unit, is_pm) = lock_stock(&mut tx, id, "discard_stock.lock").await?;
        let record = unit.discard(is_pm, expect, request)?;
        persist_stock(&mut tx, &unit, "discard_stock.write").await?;

        sqlx::query(
            r#"
            INSERT INTO discards (id, stock_id, product_id, location_id, reason, operator, discard_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.stock_id.as_uuid())
        .bind(record.product_id.as_uuid())
        .bind(record.location_id.as_uuid())
        .bind(&record.reason)
        .bind(&record.operator)
        .bind(record.discard_date)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("discard_stock.audit", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("discard_stock.commit", e))?;
        Ok(record)
    }

    #[instrument(skip(self), fields(stock_id = %id), err)]
    async fn set_iams_id(&self, id: StockId, iams_id: Option<String>) -> StoreResult<Stock> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("set_iams_id.begin", e))?;
        let (mut unit, is_pm) = lock_stock(&mut tx, id, "set_iams_id.lock").await?;
        ProductKind::PropertyManaged.ensure(is_pm)?;
        unit.iams_id = iams_id;
        persist_stock(&mut tx, &unit, "set_iams_id.write").await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("set_iams_id.commit", e))?;
        Ok(unit)
    }

    #[instrument(skip(self), fields(stock_id = %id), err)]
    async fn stock_history(&self, id: StockId) -> StoreResult<StockHistory> {
        if self.get_stock(id).await?.is_none() {
            return Err(LifecycleError::StockNotFound.into());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, stock_id, from_location, to_location, created_at
            FROM transfers
            WHERE stock_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_history.transfers", e))?;
        let transfers = decode_all("stock_history.transfers", &rows, transfer_from)?;

        let rows = sqlx::query(
            r#"
            SELECT id, stock_id, product_id, location_id, borrower, renter, loan_type,
                   loan_date, due_date, return_date
            FROM rentals
            WHERE stock_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_history.rentals", e))?;
        let rentals = decode_all("stock_history.rentals", &rows, rental_from)?;

        let rows = sqlx::query(
            r#"
            SELECT id, stock_id, product_id, location_id, reason, operator, discard_date
            FROM discards
            WHERE stock_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_history.discards", e))?;
        let discards = decode_all("stock_history.discards", &rows, discard_from)?;

        let mut history = StockHistory {
            transfers,
            rentals,
            discards,
        };
        history.sort();
        Ok(history)
    }

    #[instrument(skip(self, loan), fields(stock_id = %id, loan_type = loan.loan_type.as_str()), err)]
    async fn lend_stock(&self, id: StockId, expect: ProductKind, loan: NewLoan) -> StoreResult<Rental> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("lend_stock.begin", e))?;

        let (mut unit, is_pm) = lock_stock(&mut tx, id, "lend_stock.lock").await?;
        let open: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM rentals WHERE stock_id = $1 AND return_date IS NULL)",
        )
        .bind(id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lend_stock.open", e))?;

        let rental = unit.lend(is_pm, expect, open, loan)?;
        persist_stock(&mut tx, &unit, "lend_stock.write").await?;

        sqlx::query(
            r#"
            INSERT INTO rentals (
                id, stock_id, product_id, location_id, borrower, renter, loan_type,
                loan_date, due_date, return_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL)
            "#,
        )
        .bind(rental.id.as_uuid())
        .bind(rental.stock_id.as_uuid())
        .bind(rental.product_id.as_uuid())
        .bind(rental.location_id.as_uuid())
        .bind(&rental.borrower)
        .bind(rental.renter.as_deref())
        .bind(rental.loan_type.as_str())
        .bind(rental.loan_date)
        .bind(rental.due_date)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Lifecycle(LifecycleError::AlreadyBorrowed)
            } else {
                map_sqlx_error("lend_stock.ledger", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("lend_stock.commit", e))?;
        Ok(rental)
    }

    #[instrument(skip(self), fields(rental_id = %id), err)]
    async fn get_rental(&self, id: RentalId) -> StoreResult<Option<Rental>> {
        let row = sqlx::query(
            r#"
            SELECT id, stock_id, product_id, location_id, borrower, renter, loan_type,
                   loan_date, due_date, return_date
            FROM rentals
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_rental", e))?;
        row.map(|r| rental_from(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("get_rental", e))
    }

    #[instrument(skip(self), fields(rental_id = %id), err)]
    async fn extend_rental(
        &self,
        id: RentalId,
        device: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Rental> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("extend_rental.begin", e))?;
        let mut rental = lock_rental(&mut tx, id, "extend_rental.lock").await?;
        rental.extend(device, hours, now)?;
        sqlx::query("UPDATE rentals SET due_date = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(rental.due_date)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("extend_rental.write", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("extend_rental.commit", e))?;
        Ok(rental)
    }

    #[instrument(skip(self), fields(rental_id = %id), err)]
    async fn return_rental(
        &self,
        id: RentalId,
        requester: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<Rental> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("return_rental.begin", e))?;

        let stock_id: Uuid = sqlx::query_scalar("SELECT stock_id FROM rentals WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("return_rental.find", e))?
            .ok_or(LifecycleError::RentalNotFound)?;
        let (mut unit, _) = lock_stock(&mut tx, StockId::from_uuid(stock_id), "return_rental.lock_stock").await?;
        let mut rental = lock_rental(&mut tx, id, "return_rental.lock_rental").await?;

        unit.receive_return(&mut rental, requester, at)?;

        sqlx::query("UPDATE rentals SET return_date = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(rental.return_date)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("return_rental.ledger", e))?;
        persist_stock(&mut tx, &unit, "return_rental.write").await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("return_rental.commit", e))?;
        Ok(rental)
    }

    #[instrument(skip(self), fields(loan_type = loan_type.as_str()), err)]
    async fn open_rentals(&self, loan_type: LoanType) -> StoreResult<Vec<RentalView>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.stock_id, r.product_id, r.location_id, r.borrower, r.renter, r.loan_type,
                   r.loan_date, r.due_date, r.return_date,
                   s.iams_id,
                   p.id AS p_id, p.name AS p_name, p.brand AS p_brand, p.model AS p_model,
                   p.specifications AS p_specifications, p.price AS p_price,
                   p.image_link AS p_image_link, p.local_image AS p_local_image,
                   p.is_property_managed AS p_is_property_managed, p.created_at AS p_created_at
            FROM rentals r
            JOIN products p ON p.id = r.product_id
            LEFT JOIN stock s ON s.id = r.stock_id
            WHERE r.return_date IS NULL AND r.loan_type = $1
            "#,
        )
        .bind(loan_type.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_rentals", e))?;
        decode_all("open_rentals", &rows, |r| {
            Ok(RentalView {
                rental: rental_from(r)?,
                product: product_from(r, "p_")?,
                iams_id: r.try_get("iams_id")?,
            })
        })
    }

    #[instrument(skip(self), fields(device_id = %id), err)]
    async fn get_device(&self, id: DeviceId) -> StoreResult<Option<Device>> {
        let row = sqlx::query("SELECT id, name, created_at, updated_at FROM devices WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_device", e))?;
        row.map(|r| device_from(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("get_device", e))
    }

    #[instrument(skip(self), fields(device_id = %id), err)]
    async fn upsert_device(&self, id: DeviceId, name: &str, now: DateTime<Utc>) -> StoreResult<Device> {
        let device = Device::register(id, name, now)?;
        let row = sqlx::query(
            r#"
            INSERT INTO devices (id, name, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_at = EXCLUDED.updated_at
            RETURNING id, name, created_at, updated_at
            "#,
        )
        .bind(device.id.as_uuid())
        .bind(&device.name)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_device", e))?;
        device_from(&row).map_err(|e| map_sqlx_error("upsert_device", e))
    }

    #[instrument(skip(self), err)]
    async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        let rows = sqlx::query("SELECT id, name, created_at, updated_at FROM devices")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_devices", e))?;
        decode_all("list_devices", &rows, device_from)
    }

    #[instrument(skip(self), err)]
    async fn find_user(&self, login: &str) -> StoreResult<Option<User>> {
        let login = login.trim();
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            WHERE username = $1 OR email = $2
            ORDER BY (username = $1) DESC
            LIMIT 1
            "#,
        )
        .bind(login)
        .bind(login.to_lowercase())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user", e))?;
        row.map(|r| user_from(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("find_user", e))
    }

    #[instrument(skip(self), err)]
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        row.map(|r| user_from(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("find_user_by_email", e))
    }

    #[instrument(skip(self), err)]
    async fn identity_taken(&self, username: &str, email: &str) -> StoreResult<IdentityTaken> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (SELECT 1 FROM users WHERE username = $1) AS username_taken,
                   EXISTS (SELECT 1 FROM users WHERE email = $2) AS email_taken
            "#,
        )
        .bind(username)
        .bind(email)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("identity_taken", e))?;
        let decode = || -> Result<IdentityTaken, sqlx::Error> {
            Ok(IdentityTaken {
                username: row.try_get("username_taken")?,
                email: row.try_get("email_taken")?,
            })
        };
        decode().map_err(|e| map_sqlx_error("identity_taken", e))
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert_user(&self, user: User) -> StoreResult<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("username or email already registered".into())
            } else {
                map_sqlx_error("insert_user", e)
            }
        })?;
        Ok(user)
    }

    #[instrument(skip(self, password_hash), fields(user_id = %id), err)]
    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> StoreResult<()> {
        let done = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(password_hash)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_password_hash", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, code), fields(purpose = code.purpose.as_str()), err)]
    async fn replace_code(&self, code: VerificationCode) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("replace_code.begin", e))?;
        sqlx::query(
            r#"
            DELETE FROM verification_codes
            WHERE email = $1 AND purpose = $2 AND consumed_at IS NULL
            "#,
        )
        .bind(&code.email)
        .bind(code.purpose.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replace_code.delete", e))?;

        sqlx::query(
            r#"
            INSERT INTO verification_codes (
                id, email, user_id, purpose, code_hash, username, attempts,
                expires_at, consumed_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(code.id.as_uuid())
        .bind(&code.email)
        .bind(code.user_id.map(Uuid::from))
        .bind(code.purpose.as_str())
        .bind(&code.code_hash)
        .bind(code.username.as_deref())
        .bind(i32::try_from(code.attempts).unwrap_or(i32::MAX))
        .bind(code.expires_at)
        .bind(code.consumed_at)
        .bind(code.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replace_code.insert", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("replace_code.commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(purpose = purpose.as_str()), err)]
    async fn latest_live_code(
        &self,
        email: &str,
        purpose: VerificationPurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationCode>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, user_id, purpose, code_hash, username, attempts,
                   expires_at, consumed_at, created_at
            FROM verification_codes
            WHERE email = $1 AND purpose = $2 AND consumed_at IS NULL AND expires_at > $3
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_live_code", e))?;
        row.map(|r| code_from(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("latest_live_code", e))
    }

    #[instrument(skip(self), fields(code_id = %id), err)]
    async fn consume_code(&self, id: CodeId, at: DateTime<Utc>, failed_attempt: bool) -> StoreResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE verification_codes
            SET consumed_at = $2, attempts = attempts + $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .bind(i32::from(failed_attempt))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("consume_code", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("code {id}")));
        }
        Ok(())
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") => StoreError::Conflict(msg),
                _ => StoreError::Unexpected(anyhow::anyhow!(msg)),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(operation.to_string()),
        other => StoreError::Unexpected(anyhow::Error::new(other).context(format!("sqlx error in {operation}"))),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
