//! Service wiring: storage backend, application services and shared state.

use std::sync::Arc;

use anyhow::Context;

use labinv_auth::{Hs256Jwt, PasswordHasher};
use labinv_core::LocationId;
use labinv_infra::config::{AppConfig, ROOT_LOCATION_LABEL};
use labinv_infra::mailer::{LogMailer, Mailer};
use labinv_infra::maintenance::MaintenanceStore;
use labinv_infra::services::{AccountService, InventoryService, RentalService};
use labinv_infra::store::{InMemoryStore, LabStore, PostgresStore};

/// Everything a handler can reach, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn LabStore>,
    pub inventory: InventoryService,
    pub rentals: RentalService,
    pub accounts: AccountService,
    pub maintenance: Arc<MaintenanceStore>,
    pub root: LocationId,
}

impl AppServices {
    /// Wire services over an existing store. The root location must already exist.
    pub fn new(
        store: Arc<dyn LabStore>,
        config: &AppConfig,
        mailer: Arc<dyn Mailer>,
        hasher: PasswordHasher,
    ) -> anyhow::Result<Self> {
        let jwt = Hs256Jwt::new(&config.auth_secret).context("build session signer")?;
        let root = config.root_location_id;
        Ok(Self {
            inventory: InventoryService::new(store.clone(), root),
            rentals: RentalService::new(store.clone()),
            accounts: AccountService::new(store.clone(), jwt, hasher, mailer, config.app_name.clone()),
            maintenance: Arc::new(MaintenanceStore::new(&config.runtime_dir)),
            store,
            root,
        })
    }
}

/// Pick the backend from `config`, ensure the root location and wire services.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store: Arc<dyn LabStore> = match (&config.database_url, config.use_persistent_stores) {
        (Some(url), true) => Arc::new(
            PostgresStore::connect(url, config.db_max_connections)
                .await
                .context("connect to postgres")?,
        ),
        _ => {
            tracing::warn!("USE_PERSISTENT_STORES is off; data lives in memory only");
            Arc::new(InMemoryStore::new())
        }
    };
    prepare_store(store.as_ref(), config.root_location_id).await?;
    tracing::info!(backend = store.backend_name(), root = %config.root_location_id, "store ready");

    AppServices::new(store, config, Arc::new(LogMailer), PasswordHasher::default())
}

/// Create the root location if it is missing.
pub async fn prepare_store(store: &dyn LabStore, root: LocationId) -> anyhow::Result<()> {
    store
        .ensure_root(root, ROOT_LOCATION_LABEL)
        .await
        .context("ensure root location")?;
    Ok(())
}
